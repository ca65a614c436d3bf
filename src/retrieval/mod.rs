//! 检索层：检索服务客户端与 `retrieval_query` 内置工具

pub mod client;
pub mod tool;

pub use client::{Citation, DataSource, HttpRetrievalClient, RetrievalError, RetrievalResponse, RetrievalService};
pub use tool::{RetrievalTool, RETRIEVAL_TOOL_NAME};
