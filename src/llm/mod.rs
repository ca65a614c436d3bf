//! 模型调用层：调用抽象、超时重试包装与脚本化 Mock

pub mod mock;
pub mod retry;
pub mod traits;

pub use mock::{RecordedCall, ScriptedModelCaller};
pub use retry::{RetryConfig, RetryingModelCaller};
pub use traits::{LlmError, ModelCaller, ModelOptions, ModelReply, ToolSchema};
