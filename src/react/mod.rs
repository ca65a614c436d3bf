//! Agent 循环：模型调用与工具调用交替进行

pub mod loop_;

pub use loop_::{AgentLoop, LoopOutcome};
