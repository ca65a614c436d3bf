//! 聊天请求：外部调用方（Web / CLI / SSE 路由层）构造后交给编排器，构造后不再修改

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 未显式指定分组时用户所属的默认分组
pub const DEFAULT_GROUP: &str = "default";

/// 温度上限（与主流 OpenAI 兼容接口一致）
const MAX_TEMPERATURE: f32 = 2.0;

/// 请求方身份：用户 ID + 所属分组（用于工具权限范围）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default = "default_groups")]
    pub groups: BTreeSet<String>,
}

fn default_groups() -> BTreeSet<String> {
    BTreeSet::from([DEFAULT_GROUP.to_string()])
}

impl UserIdentity {
    /// 新用户，默认属于 `default` 分组
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            groups: default_groups(),
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

    /// 是否与给定分组有交集
    pub fn shares_group<'a>(&self, groups: impl IntoIterator<Item = &'a String>) -> bool {
        groups.into_iter().any(|g| self.groups.contains(g))
    }
}

/// 循环策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStrategy {
    /// 模型 -> 工具 -> 模型，直到最终回复或步数上限
    #[default]
    Standard,
    /// 只允许一次模型调用（步数上限固定为 1）
    SingleStep,
}

/// 随请求附带的文件
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileAttachment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            uri: None,
            size: None,
        }
    }
}

/// 单条用户消息对应的聊天请求
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub user: UserIdentity,
    pub content: String,
    pub model: String,
    /// 本轮允许的工具名；None 或空集表示不限制
    #[serde(default)]
    pub enabled_tools: Option<BTreeSet<String>>,
    #[serde(default)]
    pub prompts: BTreeSet<String>,
    #[serde(default)]
    pub data_sources: BTreeSet<String>,
    #[serde(default)]
    pub retrieval_only: bool,
    #[serde(default)]
    pub require_tool_choice: bool,
    #[serde(default = "default_agent_mode")]
    pub agent_mode: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub agent_max_steps: Option<usize>,
    #[serde(default)]
    pub loop_strategy: Option<LoopStrategy>,
    #[serde(default)]
    pub attachments: Vec<FileAttachment>,
    /// 透传给模型调用方的扩展字段
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

fn default_agent_mode() -> bool {
    true
}

impl ChatRequest {
    pub fn builder(
        session_id: impl Into<String>,
        user: UserIdentity,
        content: impl Into<String>,
        model: impl Into<String>,
    ) -> ChatRequestBuilder {
        ChatRequestBuilder {
            request: ChatRequest {
                session_id: session_id.into(),
                user,
                content: content.into(),
                model: model.into(),
                enabled_tools: None,
                prompts: BTreeSet::new(),
                data_sources: BTreeSet::new(),
                retrieval_only: false,
                require_tool_choice: false,
                agent_mode: default_agent_mode(),
                temperature: None,
                agent_max_steps: None,
                loop_strategy: None,
                attachments: Vec::new(),
                extensions: Map::new(),
            },
        }
    }

    /// 校验必填字段与取值范围，错误信息直接作为 InvalidRequest 的内容
    pub fn validate(&self) -> Result<(), String> {
        if self.session_id.trim().is_empty() {
            return Err("session_id is required".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model is required".to_string());
        }
        if self.agent_max_steps == Some(0) {
            return Err("agent_max_steps must be a positive integer".to_string());
        }
        if let Some(t) = self.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&t) {
                return Err(format!("temperature must be within [0, {MAX_TEMPERATURE}]"));
            }
        }
        Ok(())
    }

    pub fn loop_strategy(&self) -> LoopStrategy {
        self.loop_strategy.unwrap_or_default()
    }

    /// 是否显式提供了非空的工具白名单
    pub fn has_tool_allowlist(&self) -> bool {
        self.enabled_tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// ChatRequest 构建器
pub struct ChatRequestBuilder {
    request: ChatRequest,
}

impl ChatRequestBuilder {
    pub fn enabled_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request.enabled_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn prompts<I, S>(mut self, prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request.prompts = prompts.into_iter().map(Into::into).collect();
        self
    }

    pub fn data_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request.data_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn retrieval_only(mut self, on: bool) -> Self {
        self.request.retrieval_only = on;
        self
    }

    pub fn require_tool_choice(mut self, on: bool) -> Self {
        self.request.require_tool_choice = on;
        self
    }

    pub fn agent_mode(mut self, on: bool) -> Self {
        self.request.agent_mode = on;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.request.temperature = Some(t);
        self
    }

    pub fn agent_max_steps(mut self, steps: usize) -> Self {
        self.request.agent_max_steps = Some(steps);
        self
    }

    pub fn loop_strategy(mut self, strategy: LoopStrategy) -> Self {
        self.request.loop_strategy = Some(strategy);
        self
    }

    pub fn attachment(mut self, file: FileAttachment) -> Self {
        self.request.attachments.push(file);
        self
    }

    pub fn extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.request.extensions.insert(key.into(), value);
        self
    }

    pub fn build(self) -> ChatRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ChatRequestBuilder {
        ChatRequest::builder("s1", UserIdentity::new("u1"), "hi", "m1")
    }

    #[test]
    fn test_validate_ok() {
        assert!(base().build().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let req = ChatRequest::builder("", UserIdentity::new("u1"), "hi", "m1").build();
        assert!(req.validate().unwrap_err().contains("session_id"));
        let req = ChatRequest::builder("s1", UserIdentity::new("u1"), "hi", " ").build();
        assert!(req.validate().unwrap_err().contains("model"));
    }

    #[test]
    fn test_validate_rejects_zero_steps_and_bad_temperature() {
        assert!(base().agent_max_steps(0).build().validate().is_err());
        assert!(base().temperature(3.5).build().validate().is_err());
        assert!(base().temperature(0.7).build().validate().is_ok());
    }

    #[test]
    fn test_deserialize_defaults() {
        let req: ChatRequest = serde_json::from_value(serde_json::json!({
            "session_id": "s1",
            "user": {"id": "u1"},
            "content": "hi",
            "model": "m1"
        }))
        .unwrap();
        assert!(req.agent_mode);
        assert!(req.user.groups.contains(DEFAULT_GROUP));
        assert_eq!(req.loop_strategy(), LoopStrategy::Standard);
        assert!(!req.has_tool_allowlist());
    }

    #[test]
    fn test_shares_group() {
        let user = UserIdentity::new("u1").with_groups(["ops", "dev"]);
        assert!(user.shares_group(&["dev".to_string()]));
        assert!(!user.shares_group(&["default".to_string()]));
    }
}
