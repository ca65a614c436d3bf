//! 集成测试共用桩：记录型发布者、计数工具、慢工具、检索服务桩

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use bee_chat::core::ChatOrchestrator;
use bee_chat::events::{ChatEvent, EventPublisher, PublishAck};
use bee_chat::llm::ScriptedModelCaller;
use bee_chat::retrieval::{
    Citation, DataSource, RetrievalError, RetrievalResponse, RetrievalService,
};
use bee_chat::session::{
    ChatRequest, ChatRequestBuilder, MemorySessionStore, Message, Session, SessionStore, StoreError,
    UserIdentity,
};
use bee_chat::tools::{Tool, ToolContext};

/// 记录全部事件；disconnect 后返回 Discarded
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ChatEvent>>,
    disconnected: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disconnected() -> Self {
        let p = Self::default();
        p.disconnect();
        p
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ChatEvent::kind).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: ChatEvent) -> PublishAck {
        if self.disconnected.load(Ordering::SeqCst) {
            return PublishAck::Discarded;
        }
        self.events.lock().unwrap().push(event);
        PublishAck::Delivered
    }
}

/// 回显 text 参数并计数
pub struct CountingTool {
    name: String,
    pub calls: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "counts invocations"
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(args.get("text").cloned().unwrap_or(Value::String("ok".into())))
    }
}

/// 执行很久的工具
pub struct SlowTool {
    pub delay: Duration,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "sleeps before answering"
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
        tokio::time::sleep(self.delay).await;
        Ok(Value::String("slept".into()))
    }
}

/// 检索服务桩
pub struct StubRetrieval {
    pub queries: AtomicUsize,
    pub last_source: Mutex<Option<String>>,
    pub fail: bool,
}

impl StubRetrieval {
    pub fn new() -> Self {
        Self {
            queries: AtomicUsize::new(0),
            last_source: Mutex::new(None),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl RetrievalService for StubRetrieval {
    async fn discover_data_sources(&self, _user: &UserIdentity) -> Result<Vec<DataSource>, RetrievalError> {
        if self.fail {
            return Err(RetrievalError::Unavailable("connection refused".into()));
        }
        Ok(vec![
            DataSource {
                id: "handbook".into(),
                name: "Handbook".into(),
                description: None,
            },
            DataSource {
                id: "wiki".into(),
                name: "Wiki".into(),
                description: None,
            },
        ])
    }

    async fn query(
        &self,
        _user: &UserIdentity,
        data_source: &str,
        _messages: &[Message],
    ) -> Result<RetrievalResponse, RetrievalError> {
        if self.fail {
            return Err(RetrievalError::Unavailable("connection refused".into()));
        }
        self.queries.fetch_add(1, Ordering::SeqCst);
        *self.last_source.lock().unwrap() = Some(data_source.to_string());
        Ok(RetrievalResponse {
            answer: format!("answer from {data_source}"),
            sources: vec![Citation {
                title: "Leave policy".into(),
                uri: Some(format!("{data_source}://leave")),
                snippet: "20 days per year".into(),
                score: Some(0.87),
            }],
            ..Default::default()
        })
    }
}

/// 可按操作注入故障的会话存储，底层为内存存储
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemorySessionStore,
    pub fail_get: AtomicBool,
    pub fail_update: AtomicBool,
    pub hang_get: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heal(&self) {
        self.fail_get.store(false, Ordering::SeqCst);
        self.fail_update.store(false, Ordering::SeqCst);
        self.hang_get.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        if self.hang_get.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("database is down".into()));
        }
        self.inner.get(id).await
    }

    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        self.inner.create(session).await
    }

    async fn update(&self, session: Session) -> Result<Session, StoreError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.update(session).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.exists(id).await
    }
}

pub fn request(session_id: &str, content: &str) -> ChatRequestBuilder {
    ChatRequest::builder(session_id, UserIdentity::new("alice"), content, "test-model")
}

pub fn orchestrator(model: Arc<ScriptedModelCaller>, store: Arc<MemorySessionStore>) -> ChatOrchestrator {
    ChatOrchestrator::builder()
        .with_model(model)
        .with_store(store)
        .build()
        .unwrap()
}
