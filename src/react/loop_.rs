//! Agent 主循环
//!
//! 模型 -> 工具调用（按模型给出的顺序依次执行）-> 结果回填 -> 下一次模型调用，直到最终回复、步数上限或取消。
//! 每个工具调用在下一次模型调用前恰好对应一条 tool 消息；取消时未完成的调用补一条 Cancelled 结果。

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::ChatError;
use crate::events::{ChatEvent, EventPublisher};
use crate::llm::{LlmError, ModelCaller, ModelOptions, ModelReply, ToolSchema};
use crate::session::{Message, Session, ToolCallRequest};
use crate::tools::{ToolContext, ToolDispatcher, ToolError, ToolResult, ToolScope};

/// 一轮的结束状态（步数上限与取消都是正常结束）
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Completed { content: String, steps: usize },
    StepLimitExceeded { partial_content: String, steps: usize },
    Aborted { reason: String, steps: usize },
}

impl LoopOutcome {
    pub fn steps(&self) -> usize {
        match self {
            LoopOutcome::Completed { steps, .. }
            | LoopOutcome::StepLimitExceeded { steps, .. }
            | LoopOutcome::Aborted { steps, .. } => *steps,
        }
    }
}

/// 单轮循环的全部依赖
pub struct AgentLoop<'a> {
    pub model: &'a dyn ModelCaller,
    pub dispatcher: &'a ToolDispatcher,
    pub publisher: &'a dyn EventPublisher,
    pub cancel_token: CancellationToken,
    pub options: ModelOptions,
    pub scope: ToolScope,
    pub ctx: ToolContext,
    /// 暴露给模型的工具；为空表示本轮不提供工具
    pub tools: Vec<ToolSchema>,
    /// 每次调用前置的消息（系统提示词、选中的 prompt），不写入历史
    pub preamble: Vec<Message>,
    pub max_steps: usize,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        model: &'a dyn ModelCaller,
        dispatcher: &'a ToolDispatcher,
        publisher: &'a dyn EventPublisher,
        cancel_token: CancellationToken,
        ctx: ToolContext,
    ) -> Self {
        Self {
            model,
            dispatcher,
            publisher,
            cancel_token,
            options: ModelOptions::default(),
            scope: ToolScope::default(),
            ctx,
            tools: Vec::new(),
            preamble: Vec::new(),
            max_steps: 1,
        }
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_scope(mut self, scope: ToolScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_preamble(mut self, preamble: Vec<Message>) -> Self {
        self.preamble = preamble;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    fn model_input(&self, session: &Session) -> Vec<Message> {
        self.preamble
            .iter()
            .chain(session.messages())
            .cloned()
            .collect()
    }

    /// 执行一轮；session 在返回前已包含本轮产生的全部消息（出错时为出错前的部分）
    pub async fn run(&self, session: &mut Session) -> Result<LoopOutcome, ChatError> {
        let session_id = session.id.clone();
        self.publisher
            .publish(ChatEvent::AgentTurnStart {
                session_id: session_id.clone(),
                max_steps: self.max_steps,
            })
            .await;

        let mut steps = 0;
        let mut partial = String::new();

        while steps < self.max_steps {
            if self.cancel_token.is_cancelled() {
                return self.abort(session, steps).await;
            }
            steps += 1;
            tracing::debug!(session_id = %session_id, step = steps, "Calling model");

            let input = self.model_input(session);
            let reply = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return self.abort(session, steps).await,
                r = self.model.complete(&input, &self.tools, &self.options) => r?,
            };

            let (content, calls) = match reply {
                ModelReply::Final { content } => (content, Vec::new()),
                ModelReply::ToolCalls { content, calls } => (content, calls),
            };

            if calls.is_empty() {
                session.append(Message::assistant(content.clone()))?;
                self.publisher.publish_text(content.clone()).await;
                self.publisher
                    .publish(ChatEvent::ResponseComplete { steps })
                    .await;
                return Ok(LoopOutcome::Completed { content, steps });
            }

            if calls.iter().any(|c| c.name.trim().is_empty()) {
                return Err(LlmError::MalformedResponse("tool call without a name".to_string()).into());
            }
            let calls = normalize_call_ids(session, calls);
            if !content.is_empty() {
                partial = content.clone();
            }
            session.append(Message::assistant_with_tool_calls(content.clone(), calls.clone()))?;
            self.publisher
                .publish(ChatEvent::ChatResponse {
                    message: content,
                    has_pending_tools: true,
                    tool_calls: calls.clone(),
                    sources: Vec::new(),
                })
                .await;

            for call in &calls {
                if self.cancel_token.is_cancelled() {
                    return self.abort(session, steps).await;
                }
                self.publisher
                    .publish(ChatEvent::ToolStart {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;

                let result = tokio::select! {
                    biased;
                    _ = self.cancel_token.cancelled() => {
                        ToolResult::failed(&call.id, &call.name, ToolError::Cancelled, Default::default())
                    }
                    r = self.dispatcher.invoke(call, &self.scope, &self.ctx) => r,
                };
                self.publish_tool_result(&result).await;
                session.append(Message::tool(&call.id, &call.name, result.content_text()))?;

                if result.error == Some(ToolError::Cancelled) {
                    return self.abort(session, steps).await;
                }
            }
        }

        tracing::info!(session_id = %session_id, max_steps = self.max_steps, "Step limit reached");
        self.publisher
            .publish(ChatEvent::StepLimitReached {
                max_steps: self.max_steps,
                partial_content: partial.clone(),
            })
            .await;
        Ok(LoopOutcome::StepLimitExceeded {
            partial_content: partial,
            steps,
        })
    }

    async fn publish_tool_result(&self, result: &ToolResult) {
        let event = match &result.error {
            None => ChatEvent::ToolComplete {
                call_id: result.call_id.clone(),
                tool: result.tool_name.clone(),
                result: result.content.clone(),
                elapsed_ms: result.elapsed_ms(),
            },
            Some(err) => ChatEvent::ToolError {
                call_id: result.call_id.clone(),
                tool: result.tool_name.clone(),
                code: err.code().to_string(),
                message: err.to_string(),
                elapsed_ms: result.elapsed_ms(),
            },
        };
        self.publisher.publish(event).await;
    }

    /// 取消：为尚未应答的调用补 Cancelled 结果，推送 aborted
    async fn abort(&self, session: &mut Session, steps: usize) -> Result<LoopOutcome, ChatError> {
        for (id, name) in session.pending_tool_calls() {
            session.append(Message::tool(id, name, ToolError::Cancelled.to_string()))?;
        }
        let reason = "cancelled by client".to_string();
        tracing::info!(session_id = %session.id, step = steps, "Turn aborted");
        self.publisher
            .publish(ChatEvent::Aborted {
                reason: reason.clone(),
            })
            .await;
        Ok(LoopOutcome::Aborted { reason, steps })
    }
}

/// 模型给出的调用 ID 为空或与会话内已有 ID 重复时，重新分配 `call_<uuid>`
fn normalize_call_ids(session: &Session, calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.is_empty() || session.has_call_id(&call.id) || !seen.insert(call.id.clone()) {
                let fresh = format!("call_{}", Uuid::new_v4().simple());
                tracing::debug!(original = %call.id, assigned = %fresh, "Reassigned tool call id");
                call.id = fresh.clone();
                seen.insert(fresh);
            }
            call
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelPublisher;
    use crate::llm::ScriptedModelCaller;
    use crate::session::UserIdentity;
    use crate::tools::{EchoTool, ToolRegistry};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            user: UserIdentity::new("u1"),
            data_sources: BTreeSet::new(),
        }
    }

    fn scope() -> ToolScope {
        ToolScope {
            groups: BTreeSet::from(["default".to_string()]),
            enabled: None,
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::default();
        registry.register(EchoTool);
        ToolDispatcher::new(Arc::new(registry), Duration::from_secs(5))
    }

    fn session_with_user(text: &str) -> Session {
        let mut s = Session::new("s1", "u1");
        s.append(Message::user(text)).unwrap();
        s
    }

    #[test]
    fn test_normalize_reassigns_empty_and_duplicate_ids() {
        let mut s = session_with_user("hi");
        s.append(Message::assistant_with_tool_calls(
            "",
            vec![ToolCallRequest::new("used", "echo", json!({}))],
        ))
        .unwrap();
        let calls = normalize_call_ids(
            &s,
            vec![
                ToolCallRequest::new("", "echo", json!({})),
                ToolCallRequest::new("used", "echo", json!({})),
                ToolCallRequest::new("fresh", "echo", json!({})),
                ToolCallRequest::new("fresh", "echo", json!({})),
            ],
        );
        assert!(calls[0].id.starts_with("call_"));
        assert!(calls[1].id.starts_with("call_"));
        assert_eq!(calls[2].id, "fresh");
        assert_ne!(calls[3].id, "fresh");
        let unique: HashSet<_> = calls.iter().map(|c| c.id.clone()).collect();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn test_tool_then_final_answer() {
        let model = ScriptedModelCaller::new()
            .then_tool_calls(vec![ToolCallRequest::new("c1", "echo", json!({"text": "pong"}))])
            .then_text("done");
        let d = dispatcher();
        let (publisher, mut rx) = ChannelPublisher::channel();
        let agent = AgentLoop::new(&model, &d, &publisher, CancellationToken::new(), ctx())
            .with_scope(scope())
            .with_max_steps(5);
        let mut session = session_with_user("ping");

        let outcome = agent.run(&mut session).await.unwrap();
        assert_eq!(
            outcome,
            LoopOutcome::Completed {
                content: "done".into(),
                steps: 2
            }
        );
        assert_eq!(session.len(), 4);
        assert_eq!(session.messages()[2].content, "pong");

        drop(agent);
        drop(publisher);
        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(ev.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "agent_turn_start",
                "chat_response",
                "tool_start",
                "tool_complete",
                "chat_response",
                "response_complete"
            ]
        );
    }

    #[tokio::test]
    async fn test_preamble_is_sent_but_not_persisted() {
        let model = ScriptedModelCaller::new().then_text("ok");
        let d = dispatcher();
        let publisher = crate::events::NullPublisher;
        let agent = AgentLoop::new(&model, &d, &publisher, CancellationToken::new(), ctx())
            .with_preamble(vec![Message::system("be brief")]);
        let mut session = session_with_user("hi");
        agent.run(&mut session).await.unwrap();

        let call = &model.recorded_calls()[0];
        assert_eq!(call.messages[0], Message::system("be brief"));
        assert_eq!(call.messages.len(), 2);
        assert_eq!(session.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_during_model_call() {
        let model = ScriptedModelCaller::new().with_delay(Duration::from_secs(5));
        let d = dispatcher();
        let publisher = crate::events::NullPublisher;
        let token = CancellationToken::new();
        let agent = AgentLoop::new(&model, &d, &publisher, token.clone(), ctx()).with_max_steps(3);
        let mut session = session_with_user("hi");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let outcome = agent.run(&mut session).await.unwrap();
        canceller.await.unwrap();
        assert!(matches!(outcome, LoopOutcome::Aborted { steps: 1, .. }));
        assert_eq!(session.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_tool_name_is_model_error() {
        let model = ScriptedModelCaller::new()
            .then_tool_calls(vec![ToolCallRequest::new("c1", " ", json!({}))]);
        let d = dispatcher();
        let publisher = crate::events::NullPublisher;
        let agent = AgentLoop::new(&model, &d, &publisher, CancellationToken::new(), ctx());
        let mut session = session_with_user("hi");
        let err = agent.run(&mut session).await.unwrap_err();
        assert_eq!(err.code(), "model_error");
    }
}
