//! 轮次更新事件：按循环顺序推送给客户端，可序列化为 JSON

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retrieval::Citation;
use crate::session::{FileAttachment, ToolCallRequest};

/// 单条更新事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// 轮次开始（每轮一次）
    AgentTurnStart { session_id: String, max_steps: usize },
    /// 助手文本；has_pending_tools 为 true 表示后面还有工具调用
    ChatResponse {
        message: String,
        has_pending_tools: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        sources: Vec<Citation>,
    },
    ToolStart {
        call_id: String,
        tool: String,
        arguments: Value,
    },
    ToolComplete {
        call_id: String,
        tool: String,
        result: Value,
        elapsed_ms: u64,
    },
    ToolError {
        call_id: String,
        tool: String,
        code: String,
        message: String,
        elapsed_ms: u64,
    },
    /// 会话附件集合变化
    FilesUpdated { files: Vec<FileAttachment> },
    /// 轮次正常结束
    ResponseComplete { steps: usize },
    StepLimitReached {
        max_steps: usize,
        partial_content: String,
    },
    Aborted { reason: String },
    Error { code: String, message: String },
    /// 调用方自定义负载
    Custom { payload: Value },
}

impl ChatEvent {
    /// 事件类型名（与序列化后的 `type` 字段一致）
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::AgentTurnStart { .. } => "agent_turn_start",
            ChatEvent::ChatResponse { .. } => "chat_response",
            ChatEvent::ToolStart { .. } => "tool_start",
            ChatEvent::ToolComplete { .. } => "tool_complete",
            ChatEvent::ToolError { .. } => "tool_error",
            ChatEvent::FilesUpdated { .. } => "files_updated",
            ChatEvent::ResponseComplete { .. } => "response_complete",
            ChatEvent::StepLimitReached { .. } => "step_limit_reached",
            ChatEvent::Aborted { .. } => "aborted",
            ChatEvent::Error { .. } => "error",
            ChatEvent::Custom { .. } => "custom",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_matches_serialized_tag() {
        let events = [
            ChatEvent::AgentTurnStart {
                session_id: "s1".into(),
                max_steps: 3,
            },
            ChatEvent::ToolError {
                call_id: "c1".into(),
                tool: "echo".into(),
                code: "tool_timeout".into(),
                message: "timed out".into(),
                elapsed_ms: 5,
            },
            ChatEvent::Custom { payload: json!({"k": 1}) },
        ];
        for ev in events {
            let v = serde_json::to_value(&ev).unwrap();
            assert_eq!(v["type"], ev.kind());
        }
    }

    #[test]
    fn test_chat_response_omits_empty_lists() {
        let v = serde_json::to_value(ChatEvent::ChatResponse {
            message: "hello".into(),
            has_pending_tools: false,
            tool_calls: vec![],
            sources: vec![],
        })
        .unwrap();
        assert_eq!(
            v,
            json!({"type": "chat_response", "message": "hello", "has_pending_tools": false})
        );
    }
}
