//! 工具层：内置工具、外部工具服务器（stdio / http JSON-RPC）、注册表与分发器

pub mod dispatcher;
pub mod echo;
pub mod http;
pub mod jsonrpc;
pub mod registry;
pub mod result;
pub mod server;
pub mod stdio;

pub use dispatcher::ToolDispatcher;
pub use echo::EchoTool;
pub use jsonrpc::JsonRpcError;
pub use registry::{
    PromptDescriptor, ServerStatus, Tool, ToolContext, ToolDescriptor, ToolOwner, ToolRegistry,
    ToolScope,
};
pub use result::{ToolError, ToolResult};
pub use server::{ServerConnection, ServerTransport, ToolServerConfig};
