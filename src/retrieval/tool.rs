//! 把检索服务包装成内置工具 `retrieval_query`，供模型在 agent 循环中调用

use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use super::client::RetrievalService;
use crate::session::Message;
use crate::tools::{Tool, ToolContext};

pub const RETRIEVAL_TOOL_NAME: &str = "retrieval_query";

/// retrieval_query 参数
#[derive(Debug, Deserialize, JsonSchema)]
struct RetrievalArgs {
    /// 检索问题
    query: String,
    /// 数据源 ID；缺省时使用请求指定的第一个数据源
    #[serde(default)]
    data_source: Option<String>,
}

pub struct RetrievalTool {
    service: Arc<dyn RetrievalService>,
}

impl RetrievalTool {
    pub fn new(service: Arc<dyn RetrievalService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        RETRIEVAL_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the user's knowledge sources and return an answer with citations."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(RetrievalArgs)).unwrap_or(Value::Null)
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let args: RetrievalArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        let source = match args.data_source {
            Some(s) => {
                if !ctx.data_sources.is_empty() && !ctx.data_sources.contains(&s) {
                    return Err(format!("data source '{s}' is not enabled for this request"));
                }
                s
            }
            None => match ctx.data_sources.iter().next() {
                Some(s) => s.clone(),
                None => self
                    .service
                    .discover_data_sources(&ctx.user)
                    .await
                    .map_err(|e| e.to_string())?
                    .into_iter()
                    .next()
                    .map(|d| d.id)
                    .ok_or_else(|| "no data source available".to_string())?,
            },
        };
        let response = self
            .service
            .query(&ctx.user, &source, &[Message::user(args.query)])
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_value(response).map_err(|e| e.to_string())
    }
}
