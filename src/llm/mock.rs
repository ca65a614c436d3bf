//! 脚本化模型调用方（用于测试与本地联调，无需真实模型）
//!
//! 按顺序弹出预设回复；脚本耗尽后使用兜底策略（默认回显最后一条 User 消息）。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::traits::{LlmError, ModelCaller, ModelOptions, ModelReply, ToolSchema};
use crate::session::{Message, Role, ToolCallRequest};

/// 脚本耗尽后的行为
#[derive(Clone, Debug)]
enum Fallback {
    /// 回显最后一条 User 消息
    Echo,
    /// 始终返回同一回复
    Reply(ModelReply),
    /// 始终调用同一工具（每次生成新的调用 ID）
    ToolCall { name: String, arguments: Value },
}

/// 单次调用的记录
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub options: ModelOptions,
}

/// 脚本化 ModelCaller
pub struct ScriptedModelCaller {
    script: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    fallback: Fallback,
    delay: Option<Duration>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedModelCaller {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModelCaller {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Fallback::Echo,
            delay: None,
            calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: ModelReply) -> Self {
        self.push(Ok(reply))
    }

    pub fn then_text(self, content: impl Into<String>) -> Self {
        self.then(ModelReply::text(content))
    }

    pub fn then_tool_calls(self, calls: Vec<ToolCallRequest>) -> Self {
        self.then(ModelReply::tool_calls(calls))
    }

    pub fn then_error(self, err: LlmError) -> Self {
        self.push(Err(err))
    }

    /// 脚本耗尽后始终返回该回复
    pub fn otherwise(mut self, reply: ModelReply) -> Self {
        self.fallback = Fallback::Reply(reply);
        self
    }

    /// 脚本耗尽后始终请求调用同一工具
    pub fn always_tool(mut self, name: impl Into<String>, arguments: Value) -> Self {
        self.fallback = Fallback::ToolCall {
            name: name.into(),
            arguments,
        };
        self
    }

    /// 每次调用前先等待（模拟慢模型）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.recorded
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn push(self, item: Result<ModelReply, LlmError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
        self
    }

    fn fallback_reply(&self, messages: &[Message], n: usize) -> ModelReply {
        match &self.fallback {
            Fallback::Echo => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                ModelReply::text(format!("Echo from Mock: {last_user}"))
            }
            Fallback::Reply(reply) => reply.clone(),
            Fallback::ToolCall { name, arguments } => ModelReply::tool_calls(vec![
                ToolCallRequest::new(format!("mock_call_{n}"), name.clone(), arguments.clone()),
            ]),
        }
    }
}

#[async_trait]
impl ModelCaller for ScriptedModelCaller {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &ModelOptions,
    ) -> Result<ModelReply, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(RecordedCall {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
                options: options.clone(),
            });
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(item) => item,
            None => Ok(self.fallback_reply(messages, n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_then_echo() {
        let caller = ScriptedModelCaller::new().then_text("first");
        let opts = ModelOptions::default();
        let history = [Message::user("ping")];
        assert_eq!(
            caller.complete(&history, &[], &opts).await.unwrap(),
            ModelReply::text("first")
        );
        assert_eq!(
            caller.complete(&history, &[], &opts).await.unwrap(),
            ModelReply::text("Echo from Mock: ping")
        );
        assert_eq!(caller.call_count(), 2);
        assert_eq!(caller.recorded_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_always_tool_generates_fresh_ids() {
        let caller = ScriptedModelCaller::new().always_tool("echo", json!({"text": "x"}));
        let opts = ModelOptions::default();
        let a = caller.complete(&[], &[], &opts).await.unwrap();
        let b = caller.complete(&[], &[], &opts).await.unwrap();
        let id = |r: ModelReply| match r {
            ModelReply::ToolCalls { calls, .. } => calls[0].id.clone(),
            other => panic!("unexpected reply: {other:?}"),
        };
        assert_ne!(id(a), id(b));
    }
}
