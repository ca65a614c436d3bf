//! Bee Chat - 会话式智能体编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、会话锁表、错误类型与构建器
//! - **events**: 轮次更新事件与发布者适配器（通道 / JSON Lines）
//! - **llm**: 模型调用抽象、超时重试包装与脚本化 Mock
//! - **observability**: tracing 初始化
//! - **react**: Agent 主循环（模型 -> 工具 -> 模型）
//! - **retrieval**: 检索服务客户端与 retrieval_query 工具
//! - **session**: 消息、请求、会话与会话存储
//! - **tools**: 内置工具、外部工具服务器、注册表与分发器

pub mod config;
pub mod core;
pub mod events;
pub mod llm;
pub mod observability;
pub mod react;
pub mod retrieval;
pub mod session;
pub mod tools;

pub use crate::core::{ChatError, ChatOrchestrator, FinalResponse, ResponseKind};
pub use crate::events::{ChatEvent, EventPublisher, PublishAck};
pub use crate::session::{ChatRequest, UserIdentity};
