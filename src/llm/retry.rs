//! 带超时与指数退避重试的模型调用包装

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::traits::{LlmError, ModelCaller, ModelOptions, ModelReply, ToolSchema};
use crate::session::Message;

/// 重试策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 首次调用之外的最大重试次数
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试前的等待时间（attempt 从 0 开始）
    pub fn delay_for(&self, attempt: u32, err: &LlmError) -> Duration {
        if let LlmError::RateLimited { retry_after_ms } = err {
            return Duration::from_millis((*retry_after_ms).min(self.max_delay_ms));
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// 为任意 ModelCaller 加上单次调用超时与重试
pub struct RetryingModelCaller {
    inner: Arc<dyn ModelCaller>,
    retry: RetryConfig,
    timeout: Duration,
}

impl RetryingModelCaller {
    pub fn new(inner: Arc<dyn ModelCaller>, retry: RetryConfig, timeout: Duration) -> Self {
        Self { inner, retry, timeout }
    }
}

#[async_trait]
impl ModelCaller for RetryingModelCaller {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &ModelOptions,
    ) -> Result<ModelReply, LlmError> {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(
                self.timeout,
                self.inner.complete(messages, tools, options),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout(self.timeout)),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt, &e);
                    tracing::warn!(
                        model = %options.model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
