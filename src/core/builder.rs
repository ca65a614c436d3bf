//! 编排器构建器：统一装配会话存储、模型调用方、工具注册表与检索服务

use std::sync::Arc;
use std::time::Duration;

use super::error::ChatError;
use super::locks::SessionLocks;
use super::orchestrator::{AgentSettings, ChatOrchestrator};
use crate::config::AppConfig;
use crate::llm::{ModelCaller, RetryingModelCaller};
use crate::retrieval::{HttpRetrievalClient, RetrievalService, RetrievalTool};
use crate::session::{MemorySessionStore, SessionStore, DEFAULT_GROUP};
use crate::tools::{Tool, ToolDispatcher, ToolRegistry, ToolServerConfig};

pub struct OrchestratorBuilder {
    store: Option<Arc<dyn SessionStore>>,
    model: Option<Arc<dyn ModelCaller>>,
    retrieval: Option<Arc<dyn RetrievalService>>,
    retrieval_groups: Vec<String>,
    expose_retrieval_tool: bool,
    servers: Vec<ToolServerConfig>,
    builtins: Vec<(Arc<dyn Tool>, Vec<String>)>,
    settings: AgentSettings,
    tool_timeout: Duration,
    discovery_timeout: Duration,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            store: None,
            model: None,
            retrieval: None,
            retrieval_groups: vec![DEFAULT_GROUP.to_string()],
            expose_retrieval_tool: true,
            servers: Vec::new(),
            builtins: Vec::new(),
            settings: AgentSettings::default(),
            tool_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(15),
        }
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelCaller>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_retrieval(mut self, service: Arc<dyn RetrievalService>) -> Self {
        self.retrieval = Some(service);
        self
    }

    /// retrieval_query 工具对哪些分组可见；expose = false 时不注册该工具
    pub fn with_retrieval_tool(mut self, expose: bool, groups: Vec<String>) -> Self {
        self.expose_retrieval_tool = expose;
        self.retrieval_groups = groups;
        self
    }

    pub fn with_tool_servers(mut self, servers: Vec<ToolServerConfig>) -> Self {
        self.servers = servers;
        self
    }

    /// 注册内置工具，默认分组可见
    pub fn with_tool(self, tool: impl Tool + 'static) -> Self {
        self.with_tool_in_groups(Arc::new(tool), vec![DEFAULT_GROUP.to_string()])
    }

    pub fn with_tool_in_groups(mut self, tool: Arc<dyn Tool>, groups: Vec<String>) -> Self {
        self.builtins.push((tool, groups));
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ChatOrchestrator, ChatError> {
        let model = self
            .model
            .ok_or_else(|| ChatError::Config("a model caller is required".to_string()))?;
        if self.settings.hard_max_steps == 0 {
            return Err(ChatError::Config("agent.hard_max_steps must be positive".to_string()));
        }

        let mut registry = ToolRegistry::new(self.servers, self.tool_timeout, self.discovery_timeout);
        for (tool, groups) in self.builtins {
            registry.register_builtin(tool, groups);
        }
        if let Some(service) = &self.retrieval {
            if self.expose_retrieval_tool {
                registry.register_builtin(Arc::new(RetrievalTool::new(service.clone())), self.retrieval_groups);
            }
        }

        Ok(ChatOrchestrator {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
            model,
            dispatcher: ToolDispatcher::new(Arc::new(registry), self.tool_timeout),
            retrieval: self.retrieval,
            locks: SessionLocks::new(),
            settings: self.settings,
        })
    }
}

impl ChatOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// 按配置装配：模型调用方外包一层超时重试，配置了 base_url 时启用 HTTP 检索
    pub fn from_config(config: &AppConfig, model: Arc<dyn ModelCaller>) -> Result<Self, ChatError> {
        let model: Arc<dyn ModelCaller> = Arc::new(RetryingModelCaller::new(
            model,
            config.llm.retry.clone(),
            Duration::from_secs(config.llm.timeouts.request),
        ));
        let mut builder = Self::builder()
            .with_model(model)
            .with_settings(AgentSettings::from_config(config))
            .with_tool_servers(config.tools.servers.clone())
            .with_tool_timeout(Duration::from_secs(config.tools.tool_timeout_secs))
            .with_discovery_timeout(Duration::from_secs(config.tools.discovery_timeout_secs))
            .with_retrieval_tool(config.retrieval.expose_as_tool, config.retrieval.groups.clone());

        if let Some(base_url) = &config.retrieval.base_url {
            let client = HttpRetrievalClient::new(base_url.clone(), Duration::from_secs(config.retrieval.timeout_secs))
                .map_err(|e| ChatError::Config(e.to_string()))?;
            builder = builder.with_retrieval(Arc::new(client));
        }
        builder.build()
    }
}
