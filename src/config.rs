//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__AGENT__DEFAULT_MAX_STEPS=10`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::RetryConfig;
use crate::session::DEFAULT_GROUP;
use crate::tools::ToolServerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub retrieval: RetrievalSection,
    pub session: SessionSection,
}

/// [agent] 段：步数上限与系统提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 请求未指定 agent_max_steps 时的默认步数
    pub default_max_steps: usize,
    /// 任何请求都不能超过的步数
    pub hard_max_steps: usize,
    /// agent_mode = false（普通聊天）时的步数
    pub chat_mode_max_steps: usize,
    /// 每次模型调用前置的系统提示词（不写入会话历史）
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            default_max_steps: 30,
            hard_max_steps: 100,
            chat_mode_max_steps: 3,
            system_prompt: None,
        }
    }
}

/// [llm] 段：单次调用超时与重试
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmSection {
    pub timeouts: LlmTimeoutsSection,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次模型调用超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [tools] 段：工具调用超时、发现超时、外部工具服务器列表
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 单个服务器发现（连接 + tools/list + prompts/list）超时（秒）
    pub discovery_timeout_secs: u64,
    pub servers: Vec<ToolServerConfig>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            discovery_timeout_secs: 15,
            servers: Vec::new(),
        }
    }
}

/// [retrieval] 段：未配置 base_url 时不启用检索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// 可使用 retrieval_query 工具的分组
    pub groups: Vec<String>,
    /// 是否把检索服务作为内置工具暴露给模型
    pub expose_as_tool: bool,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            groups: vec![DEFAULT_GROUP.to_string()],
            expose_as_tool: true,
        }
    }
}

/// [session] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 单次会话存储操作超时（秒）
    pub store_timeout_secs: u64,
    /// 锁表项闲置多久后可被清理（秒）
    pub lock_idle_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            store_timeout_secs: 10,
            lock_idle_secs: 7200,
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.default_max_steps, 30);
        assert_eq!(cfg.agent.hard_max_steps, 100);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert!(cfg.retrieval.base_url.is_none());
        assert_eq!(cfg.llm.retry.max_retries, 2);
    }

    #[test]
    fn test_load_explicit_file_with_servers() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[agent]
default_max_steps = 8
system_prompt = "You are Bee."

[tools]
tool_timeout_secs = 5

[[tools.servers]]
name = "files"
groups = ["dev"]
transport = {{ type = "stdio", command = "files-server", args = ["--root", "/srv"] }}

[[tools.servers]]
name = "search"
transport = {{ type = "http", url = "http://localhost:9000/rpc" }}
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.default_max_steps, 8);
        assert_eq!(cfg.agent.hard_max_steps, 100);
        assert_eq!(cfg.agent.system_prompt.as_deref(), Some("You are Bee."));
        assert_eq!(cfg.tools.tool_timeout_secs, 5);
        assert_eq!(cfg.tools.servers.len(), 2);
        assert_eq!(cfg.tools.servers[0].groups, vec!["dev".to_string()]);
        assert_eq!(cfg.tools.servers[1].groups, vec!["default".to_string()]);
    }
}
