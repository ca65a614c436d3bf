//! 工具分发器
//!
//! 查找 -> 权限检查 -> 带超时执行；所有失败都折叠成带 ToolError 的 ToolResult，不向上抛。
//! 每次调用输出一行结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use super::registry::{ToolContext, ToolRegistry, ToolScope};
use super::result::{ToolError, ToolResult};
use crate::llm::ToolSchema;
use crate::session::ToolCallRequest;

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 本轮暴露给模型的工具 schema
    pub async fn visible_schemas(&self, scope: &ToolScope) -> Vec<ToolSchema> {
        self.registry
            .visible_tools(scope)
            .await
            .into_iter()
            .map(|t| ToolSchema {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
            })
            .collect()
    }

    pub async fn invoke(&self, call: &ToolCallRequest, scope: &ToolScope, ctx: &ToolContext) -> ToolResult {
        let start = Instant::now();
        let outcome = self.run(call, scope, ctx).await;
        let elapsed = start.elapsed();

        let (ok, label) = match &outcome {
            Ok(_) => (true, "ok"),
            Err(e) => (false, e.code()),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "session_id": ctx.session_id,
            "tool": call.name,
            "call_id": call.id,
            "ok": ok,
            "outcome": label,
            "duration_ms": elapsed.as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        match outcome {
            Ok(content) => ToolResult::ok(&call.id, &call.name, content, elapsed),
            Err(e) => ToolResult::failed(&call.id, &call.name, e, elapsed),
        }
    }

    async fn run(
        &self,
        call: &ToolCallRequest,
        scope: &ToolScope,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .registry
            .lookup(&call.name)
            .await
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        if !scope.permits(&tool) {
            return Err(ToolError::Forbidden(call.name.clone()));
        }
        match timeout(self.timeout, self.registry.execute(&tool, call.arguments.clone(), ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserIdentity;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::BTreeSet;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            user: UserIdentity::new("u1"),
            data_sources: BTreeSet::new(),
        }
    }

    fn default_scope() -> ToolScope {
        ToolScope {
            groups: BTreeSet::from(["default".to_string()]),
            enabled: None,
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::default();
        registry.register(EchoTool);
        registry.register(Sleepy);
        ToolDispatcher::new(Arc::new(registry), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_invoke_ok() {
        let d = dispatcher();
        let call = ToolCallRequest::new("c1", "echo", json!({"text": "hi"}));
        let r = d.invoke(&call, &default_scope(), &ctx()).await;
        assert!(!r.is_error());
        assert_eq!(r.content, json!("hi"));
        assert_eq!(r.call_id, "c1");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_result_not_panic() {
        let d = dispatcher();
        let call = ToolCallRequest::new("c1", "nope", json!({}));
        let r = d.invoke(&call, &default_scope(), &ctx()).await;
        assert_eq!(r.error, Some(ToolError::NotFound("nope".into())));
    }

    #[tokio::test]
    async fn test_allowlist_forbids_other_tools() {
        let d = dispatcher();
        let scope = ToolScope {
            enabled: Some(BTreeSet::from(["sleepy".to_string()])),
            ..default_scope()
        };
        let call = ToolCallRequest::new("c1", "echo", json!({}));
        let r = d.invoke(&call, &scope, &ctx()).await;
        assert_eq!(r.error, Some(ToolError::Forbidden("echo".into())));
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let d = dispatcher();
        let call = ToolCallRequest::new("c1", "sleepy", json!({}));
        let r = d.invoke(&call, &default_scope(), &ctx()).await;
        assert!(matches!(r.error, Some(ToolError::Timeout(_))));
        assert!(r.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_visible_schemas() {
        let d = dispatcher();
        let schemas = d.visible_schemas(&default_scope()).await;
        let names: Vec<_> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "sleepy"]);
        assert_eq!(schemas[0].parameters["type"], "object");
    }
}
