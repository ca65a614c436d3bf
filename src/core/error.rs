//! 编排器错误类型
//!
//! 只有中断轮次的失败才是 ChatError；步数上限与主动取消是正常结束（见 `ResponseKind`），
//! 工具失败作为 ToolResult 回填给模型。

use thiserror::Error;

use crate::llm::LlmError;
use crate::retrieval::RetrievalError;
use crate::session::{SessionError, StoreError};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Session store failure: {0}")]
    SessionStoreFailure(String),

    #[error("Session history violation: {0}")]
    Session(#[from] SessionError),

    #[error("Config error: {0}")]
    Config(String),
}

impl ChatError {
    /// error 事件中的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::InvalidRequest(_) => "invalid_request",
            ChatError::SessionBusy(_) => "session_busy",
            ChatError::RetrievalUnavailable(_) => "retrieval_unavailable",
            ChatError::ModelUnavailable(_) => "model_unavailable",
            ChatError::ModelError(_) => "model_error",
            ChatError::SessionStoreFailure(_) => "session_store_failure",
            ChatError::Session(_) => "session_history_violation",
            ChatError::Config(_) => "config_error",
        }
    }
}

impl From<LlmError> for ChatError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Unavailable(_) | LlmError::Timeout(_) | LlmError::RateLimited { .. } => {
                ChatError::ModelUnavailable(e.to_string())
            }
            LlmError::MalformedResponse(_) | LlmError::Api(_) => ChatError::ModelError(e.to_string()),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        ChatError::SessionStoreFailure(e.to_string())
    }
}

impl From<RetrievalError> for ChatError {
    fn from(e: RetrievalError) -> Self {
        ChatError::RetrievalUnavailable(e.to_string())
    }
}

impl From<config::ConfigError> for ChatError {
    fn from(e: config::ConfigError) -> Self {
        ChatError::Config(e.to_string())
    }
}
