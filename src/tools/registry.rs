//! 工具注册表
//!
//! 内置工具实现 `Tool` trait 直接注册；外部工具服务器在首次使用时并发发现（tools/list + prompts/list），
//! 结果缓存为一份能力目录，直到 `reload` 改变服务器列表。单个服务器失败只记为 Unavailable，不影响其它服务器。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::jsonrpc::{JsonRpcError, McpPrompt, McpTool};
use super::result::ToolError;
use super::server::{ServerConnection, ToolServerConfig};
use crate::session::{ChatRequest, UserIdentity, DEFAULT_GROUP};

/// 内置工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String>;
}

/// 执行工具时可见的请求上下文
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub user: UserIdentity,
    pub data_sources: BTreeSet<String>,
}

impl ToolContext {
    pub fn for_request(request: &ChatRequest) -> Self {
        Self {
            session_id: request.session_id.clone(),
            user: request.user.clone(),
            data_sources: request.data_sources.clone(),
        }
    }
}

/// 本轮工具可见范围：用户分组 + 可选的工具白名单
#[derive(Debug, Clone, Default)]
pub struct ToolScope {
    pub groups: BTreeSet<String>,
    pub enabled: Option<BTreeSet<String>>,
}

impl ToolScope {
    pub fn for_request(request: &ChatRequest) -> Self {
        Self {
            groups: request.user.groups.clone(),
            enabled: request.enabled_tools.clone().filter(|t| !t.is_empty()),
        }
    }

    pub fn permits_groups(&self, groups: &[String]) -> bool {
        groups.iter().any(|g| self.groups.contains(g))
    }

    pub fn permits(&self, tool: &ToolDescriptor) -> bool {
        self.permits_groups(&tool.groups)
            && self
                .enabled
                .as_ref()
                .map_or(true, |enabled| enabled.contains(&tool.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOwner {
    Builtin,
    Server(String),
}

/// 目录中的一个工具
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub owner: ToolOwner,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PromptDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub server: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    /// 尚未发现
    Pending,
    Available { tools: usize, prompts: usize },
    Unavailable { reason: String },
}

/// 一次发现周期的结果
#[derive(Default)]
struct Catalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    prompts: HashMap<String, PromptDescriptor>,
    statuses: BTreeMap<String, ServerStatus>,
}

impl Catalog {
    /// 同名工具先到先得
    fn add_tool(&mut self, tool: ToolDescriptor) {
        if let Some(&i) = self.index.get(&tool.name) {
            tracing::warn!(
                tool = %tool.name,
                kept = ?self.tools[i].owner,
                skipped = ?tool.owner,
                "Tool name collision, keeping first registration"
            );
            return;
        }
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
    }

    fn add_prompt(&mut self, prompt: PromptDescriptor) {
        if let Some(existing) = self.prompts.get(&prompt.name) {
            tracing::warn!(
                prompt = %prompt.name,
                kept = %existing.server,
                skipped = %prompt.server,
                "Prompt name collision, keeping first registration"
            );
            return;
        }
        self.prompts.insert(prompt.name.clone(), prompt);
    }

    fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }
}

struct BuiltinEntry {
    tool: Arc<dyn Tool>,
    groups: Vec<String>,
}

/// 工具注册表
pub struct ToolRegistry {
    builtins: Vec<BuiltinEntry>,
    servers: RwLock<Vec<ToolServerConfig>>,
    connections: RwLock<HashMap<String, Arc<ServerConnection>>>,
    catalog: RwLock<Option<Arc<Catalog>>>,
    discovery: Mutex<()>,
    request_timeout: Duration,
    discovery_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Vec::new(), Duration::from_secs(30), Duration::from_secs(15))
    }
}

impl ToolRegistry {
    pub fn new(servers: Vec<ToolServerConfig>, request_timeout: Duration, discovery_timeout: Duration) -> Self {
        Self {
            builtins: Vec::new(),
            servers: RwLock::new(servers),
            connections: RwLock::new(HashMap::new()),
            catalog: RwLock::new(None),
            discovery: Mutex::new(()),
            request_timeout,
            discovery_timeout,
        }
    }

    /// 注册内置工具，默认分组可见
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_builtin(Arc::new(tool), vec![DEFAULT_GROUP.to_string()]);
    }

    pub fn register_builtin(&mut self, tool: Arc<dyn Tool>, groups: Vec<String>) {
        self.builtins.push(BuiltinEntry { tool, groups });
        *self.catalog.get_mut() = None;
    }

    async fn catalog(&self) -> Arc<Catalog> {
        if let Some(c) = self.catalog.read().await.as_ref() {
            return c.clone();
        }
        let _guard = self.discovery.lock().await;
        if let Some(c) = self.catalog.read().await.as_ref() {
            return c.clone();
        }
        let catalog = Arc::new(self.discover().await);
        *self.catalog.write().await = Some(catalog.clone());
        catalog
    }

    /// 首次调用时执行发现，之后直接返回缓存
    pub async fn ensure_discovered(&self) {
        self.catalog().await;
    }

    async fn discover(&self) -> Catalog {
        let mut catalog = Catalog::default();
        for entry in &self.builtins {
            catalog.add_tool(ToolDescriptor {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                input_schema: entry.tool.parameters_schema(),
                owner: ToolOwner::Builtin,
                groups: entry.groups.clone(),
            });
        }

        let servers = self.servers.read().await.clone();
        let enabled: Vec<&ToolServerConfig> = servers.iter().filter(|s| s.enabled).collect();
        let results = join_all(enabled.iter().map(|cfg| async move {
            match tokio::time::timeout(self.discovery_timeout, self.discover_server(cfg)).await {
                Ok(r) => r,
                Err(_) => Err(JsonRpcError::Timeout("discovery".to_string())),
            }
        }))
        .await;

        for (cfg, result) in enabled.into_iter().zip(results) {
            match result {
                Ok((tools, prompts)) => {
                    tracing::info!(
                        server = %cfg.name,
                        tools = tools.len(),
                        prompts = prompts.len(),
                        "Tool server discovered"
                    );
                    catalog.statuses.insert(
                        cfg.name.clone(),
                        ServerStatus::Available {
                            tools: tools.len(),
                            prompts: prompts.len(),
                        },
                    );
                    for t in tools {
                        catalog.add_tool(ToolDescriptor {
                            description: t.description.unwrap_or_default(),
                            input_schema: t
                                .input_schema
                                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
                            name: t.name,
                            owner: ToolOwner::Server(cfg.name.clone()),
                            groups: cfg.groups.clone(),
                        });
                    }
                    for p in prompts {
                        catalog.add_prompt(PromptDescriptor {
                            name: p.name,
                            description: p.description,
                            server: cfg.name.clone(),
                            groups: cfg.groups.clone(),
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %cfg.name, error = %e, "Tool server unavailable");
                    self.drop_connection(&cfg.name).await;
                    catalog.statuses.insert(
                        cfg.name.clone(),
                        ServerStatus::Unavailable { reason: e.to_string() },
                    );
                }
            }
        }
        for cfg in servers.iter().filter(|s| !s.enabled) {
            catalog.statuses.insert(
                cfg.name.clone(),
                ServerStatus::Unavailable {
                    reason: "disabled".to_string(),
                },
            );
        }
        catalog
    }

    async fn discover_server(
        &self,
        cfg: &ToolServerConfig,
    ) -> Result<(Vec<McpTool>, Vec<McpPrompt>), JsonRpcError> {
        let conn = self.connection(cfg).await?;
        let tools = conn.list_tools().await?;
        let prompts = conn.list_prompts().await?;
        Ok((tools, prompts))
    }

    /// 取缓存连接，没有则建立
    async fn connection(&self, cfg: &ToolServerConfig) -> Result<Arc<ServerConnection>, JsonRpcError> {
        if let Some(conn) = self.connections.read().await.get(&cfg.name) {
            return Ok(conn.clone());
        }
        let conn = Arc::new(ServerConnection::connect(cfg, self.request_timeout).await?);
        let mut connections = self.connections.write().await;
        let conn = connections.entry(cfg.name.clone()).or_insert(conn).clone();
        Ok(conn)
    }

    async fn drop_connection(&self, server: &str) {
        let removed = self.connections.write().await.remove(server);
        if let Some(conn) = removed {
            conn.close().await;
        }
    }

    async fn server_config(&self, server: &str) -> Option<ToolServerConfig> {
        self.servers
            .read()
            .await
            .iter()
            .find(|s| s.name == server)
            .cloned()
    }

    /// 按名称查找工具（不做权限检查）
    pub async fn lookup(&self, name: &str) -> Option<ToolDescriptor> {
        self.catalog().await.get(name).cloned()
    }

    /// 当前范围内可见的工具，按注册顺序
    pub async fn visible_tools(&self, scope: &ToolScope) -> Vec<ToolDescriptor> {
        self.catalog()
            .await
            .tools
            .iter()
            .filter(|t| scope.permits(t))
            .cloned()
            .collect()
    }

    /// 执行已查到的工具；不做超时与权限检查（由 ToolDispatcher 负责）
    pub async fn execute(
        &self,
        tool: &ToolDescriptor,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        match &tool.owner {
            ToolOwner::Builtin => {
                let entry = self
                    .builtins
                    .iter()
                    .find(|b| b.tool.name() == tool.name)
                    .ok_or_else(|| ToolError::NotFound(tool.name.clone()))?;
                entry
                    .tool
                    .execute(args, ctx)
                    .await
                    .map_err(ToolError::ExecutionFailed)
            }
            ToolOwner::Server(server) => {
                let cfg = self
                    .server_config(server)
                    .await
                    .ok_or_else(|| ToolError::NotFound(tool.name.clone()))?;
                let conn = self
                    .connection(&cfg)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(format!("{server}: {e}")))?;
                match conn.call_tool(&tool.name, args).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(text)) => Err(ToolError::ExecutionFailed(text)),
                    Err(JsonRpcError::Timeout(_)) => Err(ToolError::Timeout(self.request_timeout)),
                    Err(e) => {
                        if matches!(e, JsonRpcError::Closed) {
                            self.drop_connection(server).await;
                        }
                        Err(ToolError::ExecutionFailed(format!("{server}: {e}")))
                    }
                }
            }
        }
    }

    /// 取 prompt 文本；未知、无权限或获取失败时返回 None
    pub async fn resolve_prompt(&self, name: &str, scope: &ToolScope) -> Option<String> {
        let catalog = self.catalog().await;
        let Some(prompt) = catalog.prompts.get(name) else {
            tracing::warn!(prompt = %name, "Unknown prompt, skipping");
            return None;
        };
        if !scope.permits_groups(&prompt.groups) {
            tracing::warn!(prompt = %name, server = %prompt.server, "Prompt not permitted for user, skipping");
            return None;
        }
        let cfg = self.server_config(&prompt.server).await?;
        let fetched = match self.connection(&cfg).await {
            Ok(conn) => conn.get_prompt(name).await,
            Err(e) => Err(e),
        };
        match fetched {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(prompt = %name, server = %prompt.server, error = %e, "Failed to fetch prompt");
                None
            }
        }
    }

    /// 替换服务器列表：被移除或配置变化的服务器断开连接，下次使用时重新发现
    pub async fn reload(&self, servers: Vec<ToolServerConfig>) {
        let stale: Vec<String> = {
            let current = self.servers.read().await;
            current
                .iter()
                .filter(|old| !servers.contains(old))
                .map(|old| old.name.clone())
                .collect()
        };
        for name in &stale {
            self.drop_connection(name).await;
        }
        let _guard = self.discovery.lock().await;
        *self.servers.write().await = servers;
        *self.catalog.write().await = None;
        tracing::info!(closed = stale.len(), "Tool server list reloaded");
    }

    /// 各服务器状态；尚未发现时全部为 Pending
    pub async fn server_statuses(&self) -> BTreeMap<String, ServerStatus> {
        if let Some(c) = self.catalog.read().await.as_ref() {
            return c.statuses.clone();
        }
        self.servers
            .read()
            .await
            .iter()
            .map(|s| (s.name.clone(), ServerStatus::Pending))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    struct Secret;

    #[async_trait]
    impl Tool for Secret {
        fn name(&self) -> &str {
            "secret"
        }

        fn description(&self) -> &str {
            "admin only"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    fn scope(groups: &[&str], enabled: Option<&[&str]>) -> ToolScope {
        ToolScope {
            groups: groups.iter().map(|g| g.to_string()).collect(),
            enabled: enabled.map(|e| e.iter().map(|t| t.to_string()).collect()),
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::default();
        r.register(EchoTool);
        r.register_builtin(Arc::new(Secret), vec!["admin".to_string()]);
        r
    }

    #[tokio::test]
    async fn test_visibility_follows_groups_and_allowlist() {
        let r = registry();
        let names = |tools: Vec<ToolDescriptor>| tools.into_iter().map(|t| t.name).collect::<Vec<_>>();

        assert_eq!(names(r.visible_tools(&scope(&["default"], None)).await), vec!["echo"]);
        assert_eq!(
            names(r.visible_tools(&scope(&["default", "admin"], None)).await),
            vec!["echo", "secret"]
        );
        assert_eq!(
            names(r.visible_tools(&scope(&["default", "admin"], Some(&["secret"]))).await),
            vec!["secret"]
        );
        assert!(r.visible_tools(&scope(&["guest"], None)).await.is_empty());
    }

    #[tokio::test]
    async fn test_builtin_name_collision_keeps_first() {
        let mut r = registry();
        r.register_builtin(Arc::new(EchoTool), vec!["admin".to_string()]);
        let echo = r.lookup("echo").await.unwrap();
        assert_eq!(echo.groups, vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_isolated() {
        let mut r = ToolRegistry::new(
            vec![ToolServerConfig::stdio("broken", "/nonexistent/bee-tool-server", vec![])],
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        r.register(EchoTool);
        assert_eq!(r.server_statuses().await["broken"], ServerStatus::Pending);

        let visible = r.visible_tools(&scope(&["default"], None)).await;
        assert_eq!(visible.len(), 1);
        assert!(matches!(
            r.server_statuses().await["broken"],
            ServerStatus::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_reload_resets_catalog() {
        let r = ToolRegistry::new(
            vec![ToolServerConfig::stdio("broken", "/nonexistent/bee-tool-server", vec![])],
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        r.ensure_discovered().await;
        r.reload(Vec::new()).await;
        assert!(r.server_statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_prompt_is_skipped() {
        let r = registry();
        assert!(r.resolve_prompt("missing", &scope(&["default"], None)).await.is_none());
    }
}
