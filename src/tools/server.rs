//! 工具服务器配置与连接
//!
//! 连接是 {子进程 stdio, 远程 http} 的枚举，registry 只通过这里的统一方法与服务器交互。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::http::HttpConnection;
use super::jsonrpc::{
    parse_call_result, parse_prompt_result, JsonRpcError, ListPromptsResult, ListToolsResult,
    McpPrompt, McpTool,
};
use super::stdio::StdioConnection;
use crate::session::DEFAULT_GROUP;

/// 传输方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    Http {
        url: String,
        /// 存放 Bearer token 的环境变量名
        #[serde(default)]
        bearer_token_env: Option<String>,
    },
}

/// `[[tools.servers]]` 单项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub transport: ServerTransport,
    /// 可访问该服务器工具的用户分组
    #[serde(default = "default_server_groups")]
    pub groups: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_server_groups() -> Vec<String> {
    vec![DEFAULT_GROUP.to_string()]
}

fn default_enabled() -> bool {
    true
}

impl ToolServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Stdio {
                command: command.into(),
                args,
                env: BTreeMap::new(),
                cwd: None,
            },
            groups: default_server_groups(),
            enabled: true,
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Http {
                url: url.into(),
                bearer_token_env: None,
            },
            groups: default_server_groups(),
            enabled: true,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

/// 已建立的服务器连接
pub enum ServerConnection {
    Stdio(StdioConnection),
    Http(HttpConnection),
}

impl ServerConnection {
    pub async fn connect(config: &ToolServerConfig, timeout: Duration) -> Result<Self, JsonRpcError> {
        match &config.transport {
            ServerTransport::Stdio {
                command,
                args,
                env,
                cwd,
            } => StdioConnection::connect(&config.name, command, args, env, cwd.as_deref(), timeout)
                .await
                .map(ServerConnection::Stdio),
            ServerTransport::Http {
                url,
                bearer_token_env,
            } => HttpConnection::connect(&config.name, url, bearer_token_env.as_deref(), timeout)
                .await
                .map(ServerConnection::Http),
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        match self {
            ServerConnection::Stdio(c) => c.request(method, params).await,
            ServerConnection::Http(c) => c.request(method, params).await,
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, JsonRpcError> {
        let result = self.request("tools/list", None).await?;
        let parsed: ListToolsResult = serde_json::from_value(result)?;
        Ok(parsed.tools)
    }

    /// 不支持 prompts 的服务器返回 method not found，视为空列表
    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>, JsonRpcError> {
        match self.request("prompts/list", None).await {
            Ok(result) => {
                let parsed: ListPromptsResult = serde_json::from_value(result)?;
                Ok(parsed.prompts)
            }
            Err(JsonRpcError::Server { code: -32601, .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_prompt(&self, name: &str) -> Result<String, JsonRpcError> {
        let result = self
            .request("prompts/get", Some(json!({"name": name, "arguments": {}})))
            .await?;
        parse_prompt_result(result)
    }

    /// 外层 Err 为通信失败，内层 Err 为工具自身报告的错误
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Result<Value, String>, JsonRpcError> {
        let result = self
            .request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        parse_call_result(result)
    }

    pub async fn close(&self) {
        match self {
            ServerConnection::Stdio(c) => c.close().await,
            ServerConnection::Http(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let cfg: ToolServerConfig = serde_json::from_value(json!({
            "name": "files",
            "transport": {"type": "stdio", "command": "files-server", "args": ["--root", "/tmp"]}
        }))
        .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.groups, vec!["default".to_string()]);
        assert!(matches!(cfg.transport, ServerTransport::Stdio { ref args, .. } if args.len() == 2));
    }

    #[test]
    fn test_http_transport_config() {
        let cfg: ToolServerConfig = serde_json::from_value(json!({
            "name": "search",
            "transport": {"type": "http", "url": "http://localhost:9000/rpc", "bearer_token_env": "SEARCH_TOKEN"},
            "groups": ["research"]
        }))
        .unwrap();
        assert_eq!(cfg.groups, vec!["research".to_string()]);
        assert_eq!(
            cfg.transport,
            ServerTransport::Http {
                url: "http://localhost:9000/rpc".into(),
                bearer_token_env: Some("SEARCH_TOKEN".into())
            }
        );
    }

    #[tokio::test]
    async fn test_connect_missing_binary_is_transport_error() {
        let cfg = ToolServerConfig::stdio("ghost", "/nonexistent/bee-tool-server", vec![]);
        let err = ServerConnection::connect(&cfg, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, JsonRpcError::Transport(_)));
    }
}
