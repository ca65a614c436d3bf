//! 对话消息：角色标签 + 内容 + 可选的工具调用 / 工具应答
//!
//! 角色是封闭集合（user / assistant / system / tool），所有与角色相关的校验都对 `Role` 做穷尽匹配。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SessionError;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模型发起的一次工具调用请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// 调用 ID（会话内唯一）
    pub id: String,
    /// 工具名
    pub name: String,
    /// 结构化参数
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 仅 assistant 消息可携带
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// 仅 tool 消息可携带：所应答的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// 携带工具调用的 assistant 消息（表示本轮尚未完成）
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// 工具结果消息，name 为工具名
    pub fn tool(call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(tool_name.into()),
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 单条消息内部的角色约束（不涉及会话上下文）
    pub fn validate(&self) -> Result<(), SessionError> {
        match self.role {
            Role::Tool => {
                if !self.tool_calls.is_empty() {
                    return Err(SessionError::ToolCallsOnRole(self.role));
                }
                match self.tool_call_id.as_deref() {
                    Some(id) if !id.is_empty() => Ok(()),
                    _ => Err(SessionError::MissingToolCallId),
                }
            }
            Role::Assistant => {
                if self.tool_call_id.is_some() {
                    return Err(SessionError::ToolCallIdOnRole(self.role));
                }
                if self
                    .tool_calls
                    .iter()
                    .any(|c| c.id.is_empty() || c.name.is_empty())
                {
                    return Err(SessionError::EmptyToolCall);
                }
                Ok(())
            }
            Role::User | Role::System => {
                if !self.tool_calls.is_empty() {
                    return Err(SessionError::ToolCallsOnRole(self.role));
                }
                if self.tool_call_id.is_some() {
                    return Err(SessionError::ToolCallIdOnRole(self.role));
                }
                Ok(())
            }
        }
    }
}
