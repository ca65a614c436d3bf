//! 会话层：消息模型、聊天请求、会话聚合与存储契约

pub mod aggregate;
pub mod message;
pub mod request;
pub mod store;

pub use aggregate::Session;
pub use message::{Message, Role, ToolCallRequest};
pub use request::{ChatRequest, ChatRequestBuilder, FileAttachment, LoopStrategy, UserIdentity, DEFAULT_GROUP};
pub use store::{MemorySessionStore, SessionStore, StoreError};

use thiserror::Error;

/// 追加消息时违反历史不变量
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0} message cannot carry tool calls")]
    ToolCallsOnRole(Role),

    #[error("{0} message cannot carry a tool_call_id")]
    ToolCallIdOnRole(Role),

    #[error("tool message is missing tool_call_id")]
    MissingToolCallId,

    #[error("tool call with empty id or name")]
    EmptyToolCall,

    #[error("tool result references unknown call id: {0}")]
    UnknownToolCallId(String),

    #[error("tool call already answered: {0}")]
    DuplicateToolResult(String),

    #[error("tool call id reused: {0}")]
    DuplicateToolCallId(String),
}
