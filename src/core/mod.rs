//! 核心编排层：错误类型、会话锁表、编排器与构建器

pub mod builder;
pub mod error;
pub mod locks;
pub mod orchestrator;

pub use builder::OrchestratorBuilder;
pub use error::ChatError;
pub use locks::{SessionLocks, TurnGuard};
pub use orchestrator::{AgentSettings, ChatOrchestrator, FinalResponse, ResponseKind};
