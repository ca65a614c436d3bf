//! 模型调用抽象
//!
//! 编排器只依赖 `ModelCaller`：给定消息历史、可见工具 schema 与调用选项，返回最终文本或一组工具调用。
//! 具体的模型传输（OpenAI 兼容接口、厂商 SDK 等）由调用方实现该 trait 注入。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::session::{Message, ToolCallRequest};

/// 暴露给模型的工具描述（名称 / 说明 / JSON Schema 参数）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 单次模型调用选项
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelOptions {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// 要求模型必须选择一个工具
    #[serde(default)]
    pub require_tool_choice: bool,
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

/// 模型回复：最终文本，或一组待执行的工具调用（可附带部分文本）
#[derive(Clone, Debug, PartialEq)]
pub enum ModelReply {
    Final { content: String },
    ToolCalls { content: String, calls: Vec<ToolCallRequest> },
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        ModelReply::Final { content: content.into() }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        ModelReply::ToolCalls {
            content: String::new(),
            calls,
        }
    }
}

/// 模型调用错误
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("model API error: {0}")]
    Api(String),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

impl LlmError {
    /// 限流、不可用、超时可以重试；格式错误与 API 业务错误重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Unavailable(_) | LlmError::Timeout(_)
        )
    }
}

/// 模型调用方
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &ModelOptions,
    ) -> Result<ModelReply, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::RateLimited { retry_after_ms: 10 }.is_retryable());
        assert!(LlmError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!LlmError::MalformedResponse("x".into()).is_retryable());
        assert!(!LlmError::Api("bad".into()).is_retryable());
    }
}
