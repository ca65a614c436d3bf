//! 聊天编排器：一条用户消息 -> 一轮对话
//!
//! 校验请求 -> 抢占会话锁（不等待）-> 读取或创建会话 -> 纯检索模式或 agent 循环 -> 持久化 -> 释放锁。
//! 锁由 TurnGuard 持有，任何退出路径（包括 future 被丢弃）都会释放。

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::ChatError;
use super::locks::SessionLocks;
use crate::config::AppConfig;
use crate::events::{ChatEvent, EventPublisher, TrackedPublisher};
use crate::llm::{ModelCaller, ModelOptions};
use crate::react::{AgentLoop, LoopOutcome};
use crate::retrieval::{Citation, RetrievalService};
use crate::session::{ChatRequest, LoopStrategy, Message, Session, SessionStore, StoreError};
use crate::tools::{ServerStatus, ToolContext, ToolDispatcher, ToolScope, ToolServerConfig};

/// 编排器运行参数（来自 [agent] 与 [session] 段）
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub default_max_steps: usize,
    pub hard_max_steps: usize,
    pub chat_mode_max_steps: usize,
    pub system_prompt: Option<String>,
    pub store_timeout: Duration,
    pub lock_idle: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_max_steps: config.agent.default_max_steps,
            hard_max_steps: config.agent.hard_max_steps,
            chat_mode_max_steps: config.agent.chat_mode_max_steps,
            system_prompt: config.agent.system_prompt.clone(),
            store_timeout: Duration::from_secs(config.session.store_timeout_secs),
            lock_idle: Duration::from_secs(config.session.lock_idle_secs),
        }
    }

    /// 本轮步数上限
    pub fn step_cap(&self, request: &ChatRequest) -> usize {
        if request.loop_strategy() == LoopStrategy::SingleStep {
            return 1;
        }
        let mut cap = request
            .agent_max_steps
            .unwrap_or(self.default_max_steps)
            .min(self.hard_max_steps);
        if !request.agent_mode {
            cap = cap.min(self.chat_mode_max_steps);
        }
        cap.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    ChatResponse,
    StepLimitExceeded,
    Aborted,
}

/// 一轮的最终结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub session_id: String,
    pub message: String,
    pub steps: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Citation>,
}

pub struct ChatOrchestrator {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) model: Arc<dyn ModelCaller>,
    pub(crate) dispatcher: ToolDispatcher,
    pub(crate) retrieval: Option<Arc<dyn RetrievalService>>,
    pub(crate) locks: SessionLocks,
    pub(crate) settings: AgentSettings,
}

impl ChatOrchestrator {
    /// 处理一条用户消息；事件按产生顺序交给 publisher
    pub async fn handle(
        &self,
        request: ChatRequest,
        publisher: &dyn EventPublisher,
    ) -> Result<FinalResponse, ChatError> {
        request.validate().map_err(ChatError::InvalidRequest)?;
        let guard = self
            .locks
            .try_acquire(&request.session_id)
            .ok_or_else(|| ChatError::SessionBusy(request.session_id.clone()))?;
        let publisher = TrackedPublisher::new(publisher, &request.session_id);

        tracing::info!(
            session_id = %request.session_id,
            user_id = %request.user.id,
            model = %request.model,
            retrieval_only = request.retrieval_only,
            "Turn started"
        );

        let mut session = match self.load_or_create(&request).await {
            Ok(s) => s,
            Err(e) => {
                publisher.publish_error(e.code(), e.to_string()).await;
                return Err(e);
            }
        };

        if session.merge_files(&request.attachments) {
            publisher
                .publish_files(session.files.values().cloned().collect())
                .await;
        }
        session.append(Message::user(request.content.clone()))?;

        let result = if request.retrieval_only {
            self.run_retrieval(&request, &mut session, &publisher, guard.token())
                .await
        } else {
            self.run_agent(&request, &mut session, &publisher, guard.token())
                .await
        };

        match result {
            Ok(response) => {
                if let Err(e) = self.persist(session).await {
                    publisher.publish_error(e.code(), e.to_string()).await;
                    return Err(e);
                }
                tracing::info!(
                    session_id = %request.session_id,
                    outcome = ?response.kind,
                    steps = response.steps,
                    events = publisher.published(),
                    "Turn finished"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(session_id = %request.session_id, error = %e, "Turn failed");
                publisher.publish_error(e.code(), e.to_string()).await;
                if let Err(pe) = self.persist(session).await {
                    tracing::warn!(session_id = %request.session_id, error = %pe, "Failed to persist partial history");
                }
                Err(e)
            }
        }
    }

    /// 取消进行中的轮次；没有活动轮次时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        let cancelled = self.locks.cancel(session_id);
        if cancelled {
            tracing::info!(session_id = %session_id, "Cancel requested");
        }
        cancelled
    }

    /// 删除会话：等进行中的轮次结束并持久化后再删除
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ChatError> {
        let guard = self.locks.acquire(session_id).await;
        let deleted = self.with_store_timeout(self.store.delete(session_id)).await?;
        self.locks.remove(session_id);
        drop(guard);
        tracing::info!(session_id = %session_id, deleted, "Session deleted");
        Ok(deleted)
    }

    /// 替换工具服务器列表并立即重新发现
    pub async fn refresh_tools(&self, servers: Vec<ToolServerConfig>) {
        let registry = self.dispatcher.registry();
        registry.reload(servers).await;
        registry.ensure_discovered().await;
    }

    pub async fn tool_statuses(&self) -> std::collections::BTreeMap<String, ServerStatus> {
        self.dispatcher.registry().server_statuses().await
    }

    /// 清理闲置的会话锁表项
    pub fn cleanup_idle_locks(&self) -> usize {
        self.locks.cleanup_idle(self.settings.lock_idle)
    }

    pub fn is_turn_active(&self, session_id: &str) -> bool {
        self.locks.is_active(session_id)
    }

    async fn with_store_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ChatError> {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(r) => r.map_err(ChatError::from),
            Err(_) => Err(ChatError::SessionStoreFailure(format!(
                "store operation timed out after {:?}",
                self.settings.store_timeout
            ))),
        }
    }

    async fn load_or_create(&self, request: &ChatRequest) -> Result<Session, ChatError> {
        if let Some(session) = self.with_store_timeout(self.store.get(&request.session_id)).await? {
            return Ok(session);
        }
        tracing::debug!(session_id = %request.session_id, "Creating session");
        let session = Session::new(&request.session_id, &request.user.id);
        self.with_store_timeout(self.store.create(session)).await
    }

    async fn persist(&self, session: Session) -> Result<(), ChatError> {
        self.with_store_timeout(self.store.update(session)).await?;
        Ok(())
    }

    async fn run_retrieval(
        &self,
        request: &ChatRequest,
        session: &mut Session,
        publisher: &dyn EventPublisher,
        token: CancellationToken,
    ) -> Result<FinalResponse, ChatError> {
        let service = self
            .retrieval
            .as_ref()
            .ok_or_else(|| ChatError::RetrievalUnavailable("no retrieval service configured".to_string()))?;

        let query = async {
            let source = match request.data_sources.iter().next() {
                Some(s) => s.clone(),
                None => service
                    .discover_data_sources(&request.user)
                    .await?
                    .into_iter()
                    .next()
                    .map(|d| d.id)
                    .ok_or_else(|| ChatError::RetrievalUnavailable("no data source available".to_string()))?,
            };
            let response = service.query(&request.user, &source, session.messages()).await?;
            Ok::<_, ChatError>((source, response))
        };
        let (source, response) = tokio::select! {
            biased;
            _ = token.cancelled() => {
                let reason = "cancelled by client".to_string();
                publisher.publish(ChatEvent::Aborted { reason: reason.clone() }).await;
                return Ok(FinalResponse {
                    kind: ResponseKind::Aborted,
                    session_id: request.session_id.clone(),
                    message: reason,
                    steps: 0,
                    sources: Vec::new(),
                });
            }
            r = query => r?,
        };
        tracing::debug!(session_id = %request.session_id, data_source = %source, "Retrieval answered");

        session.append(Message::assistant(response.answer.clone()))?;
        publisher
            .publish(ChatEvent::ChatResponse {
                message: response.answer.clone(),
                has_pending_tools: false,
                tool_calls: Vec::new(),
                sources: response.sources.clone(),
            })
            .await;
        Ok(FinalResponse {
            kind: ResponseKind::ChatResponse,
            session_id: request.session_id.clone(),
            message: response.answer,
            steps: 0,
            sources: response.sources,
        })
    }

    /// 系统提示词 + 请求选中的 prompt 文本
    async fn preamble(&self, request: &ChatRequest, scope: &ToolScope) -> Vec<Message> {
        let mut preamble = Vec::new();
        if let Some(prompt) = self.settings.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            preamble.push(Message::system(prompt));
        }
        for name in &request.prompts {
            if let Some(text) = self.dispatcher.registry().resolve_prompt(name, scope).await {
                preamble.push(Message::system(text));
            }
        }
        preamble
    }

    async fn run_agent(
        &self,
        request: &ChatRequest,
        session: &mut Session,
        publisher: &dyn EventPublisher,
        token: CancellationToken,
    ) -> Result<FinalResponse, ChatError> {
        let max_steps = self.settings.step_cap(request);
        // 普通聊天模式只在显式给出工具白名单时提供工具
        let offer_tools = request.agent_mode || request.has_tool_allowlist();
        let scope = if offer_tools {
            ToolScope::for_request(request)
        } else {
            ToolScope {
                groups: request.user.groups.clone(),
                enabled: Some(BTreeSet::new()),
            }
        };
        let tools = if offer_tools {
            self.dispatcher.visible_schemas(&scope).await
        } else {
            Vec::new()
        };
        let preamble = self.preamble(request, &scope).await;
        let options = ModelOptions {
            model: request.model.clone(),
            temperature: request.temperature,
            require_tool_choice: request.require_tool_choice && !tools.is_empty(),
            extensions: request.extensions.clone(),
        };

        let agent = AgentLoop::new(
            self.model.as_ref(),
            &self.dispatcher,
            publisher,
            token,
            ToolContext::for_request(request),
        )
        .with_options(options)
        .with_scope(scope)
        .with_tools(tools)
        .with_preamble(preamble)
        .with_max_steps(max_steps);

        let outcome = agent.run(session).await?;
        let steps = outcome.steps();
        let (kind, message) = match outcome {
            LoopOutcome::Completed { content, .. } => (ResponseKind::ChatResponse, content),
            LoopOutcome::StepLimitExceeded { partial_content, .. } => {
                (ResponseKind::StepLimitExceeded, partial_content)
            }
            LoopOutcome::Aborted { reason, .. } => (ResponseKind::Aborted, reason),
        };
        Ok(FinalResponse {
            kind,
            session_id: request.session_id.clone(),
            message,
            steps,
            sources: Vec::new(),
        })
    }
}
