//! 工具服务器 JSON-RPC 2.0 报文与协议结果类型（initialize / tools/* / prompts/*）

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const CLIENT_NAME: &str = "bee-chat";

/// JSON-RPC 请求（id 为空时即通知）
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.into(),
            params: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC 响应；服务器主动发来的通知没有 id
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
    #[serde(default)]
    pub method: Option<String>,
}

impl JsonRpcResponse {
    pub fn id_u64(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            return Err(JsonRpcError::Server {
                code: err.code,
                message: err.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// 与工具服务器通信时的错误
#[derive(Debug, Error)]
pub enum JsonRpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error [{code}]: {message}")]
    Server { code: i64, message: String },

    /// 连接已关闭（子进程退出 / 读循环结束），缓存的连接需要丢弃
    #[error("connection closed")]
    Closed,

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for JsonRpcError {
    fn from(e: serde_json::Error) -> Self {
        JsonRpcError::Decode(e.to_string())
    }
}

/// tools/list 中的单个工具
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpTool>,
}

/// prompts/list 中的单个 prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPromptsResult {
    #[serde(default)]
    pub prompts: Vec<McpPrompt>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct PromptMessage {
    content: ContentItem,
}

#[derive(Debug, Deserialize)]
struct GetPromptResult {
    #[serde(default)]
    messages: Vec<PromptMessage>,
}

fn join_text<'a>(items: impl Iterator<Item = &'a ContentItem>) -> String {
    items
        .filter(|i| i.content_type == "text")
        .filter_map(|i| i.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 解析 tools/call 结果：拼接文本内容，能解析为 JSON 的返回 JSON；isError 时返回 Err(文本)
pub fn parse_call_result(result: Value) -> Result<Result<Value, String>, JsonRpcError> {
    let parsed: CallToolResult = serde_json::from_value(result)?;
    let text = join_text(parsed.content.iter());
    if parsed.is_error {
        return Ok(Err(text));
    }
    Ok(Ok(serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))))
}

/// 解析 prompts/get 结果：拼接全部文本消息
pub fn parse_prompt_result(result: Value) -> Result<String, JsonRpcError> {
    let parsed: GetPromptResult = serde_json::from_value(result)?;
    Ok(join_text(parsed.messages.iter().map(|m| &m.content)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_has_no_id() {
        let s = serde_json::to_string(&JsonRpcRequest::notification("notifications/initialized")).unwrap();
        assert!(!s.contains("\"id\""));
        let s = serde_json::to_string(&JsonRpcRequest::new(7, "tools/list", None)).unwrap();
        assert!(s.contains("\"id\":7"));
    }

    #[test]
    fn test_parse_call_result_text_and_json() {
        let text = parse_call_result(json!({
            "content": [{"type": "text", "text": "line1"}, {"type": "image", "data": "..."}, {"type": "text", "text": "line2"}]
        }))
        .unwrap();
        assert_eq!(text, Ok(Value::String("line1\nline2".into())));

        let obj = parse_call_result(json!({"content": [{"type": "text", "text": "{\"n\": 3}"}]})).unwrap();
        assert_eq!(obj, Ok(json!({"n": 3})));
    }

    #[test]
    fn test_parse_call_result_is_error() {
        let r = parse_call_result(json!({
            "content": [{"type": "text", "text": "boom"}],
            "isError": true
        }))
        .unwrap();
        assert_eq!(r, Err("boom".to_string()));
    }

    #[test]
    fn test_response_error_maps_to_server_error() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no such method"}
        }))
        .unwrap();
        assert_eq!(resp.id_u64(), Some(1));
        assert!(matches!(resp.into_result(), Err(JsonRpcError::Server { code: -32601, .. })));
    }

    #[test]
    fn test_parse_prompt_result() {
        let text = parse_prompt_result(json!({
            "messages": [
                {"role": "user", "content": {"type": "text", "text": "You are terse."}},
                {"role": "user", "content": {"type": "text", "text": "Answer in English."}}
            ]
        }))
        .unwrap();
        assert_eq!(text, "You are terse.\nAnswer in English.");
    }
}
