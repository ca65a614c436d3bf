//! 工具调用结果：失败也是结果，回填给模型，不中断轮次

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// 工具调用失败原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool not permitted for this user: {0}")]
    Forbidden(String),

    #[error("tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("tool call cancelled")]
    Cancelled,
}

impl ToolError {
    /// 稳定的错误码（用于 tool_error 事件）
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "tool_not_found",
            ToolError::Forbidden(_) => "forbidden",
            ToolError::Timeout(_) => "tool_timeout",
            ToolError::ExecutionFailed(_) => "tool_execution_failed",
            ToolError::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    /// 成功时为工具返回值，失败时为错误文本
    pub content: Value,
    pub error: Option<ToolError>,
    pub elapsed: Duration,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, tool_name: impl Into<String>, content: Value, elapsed: Duration) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content,
            error: None,
            elapsed,
        }
    }

    pub fn failed(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: ToolError,
        elapsed: Duration,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: Value::String(error.to_string()),
            error: Some(error),
            elapsed,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    /// 写入 tool 消息的文本：字符串原样，其它 JSON 序列化
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
