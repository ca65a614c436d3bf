//! 会话聚合：有序消息历史 + 附件表 + 时间戳
//!
//! 消息只能通过 `append` 追加，追加时校验工具调用 ID 的配对关系，保证历史永远可以原样回放给模型。

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{Message, Role};
use super::request::FileAttachment;
use super::SessionError;

/// 单个会话
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// 创建该会话的用户
    pub user_id: String,
    messages: Vec<Message>,
    /// 会话附件（文件名 -> 附件）
    #[serde(default)]
    pub files: BTreeMap<String, FileAttachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            files: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 会话内是否出现过该调用 ID（无论是否已应答）
    pub fn has_call_id(&self, id: &str) -> bool {
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .any(|c| c.id == id)
    }

    /// 已发出但尚未得到 tool 消息应答的调用 ID，按发出顺序
    pub fn pending_tool_calls(&self) -> Vec<(String, String)> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .filter(|c| !answered.contains(c.id.as_str()))
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect()
    }

    /// 追加消息；违反调用 ID 配对规则时拒绝且不修改历史
    pub fn append(&mut self, message: Message) -> Result<(), SessionError> {
        message.validate()?;
        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                if !self.has_call_id(id) {
                    return Err(SessionError::UnknownToolCallId(id.to_string()));
                }
                let answered = self
                    .messages
                    .iter()
                    .any(|m| m.tool_call_id.as_deref() == Some(id));
                if answered {
                    return Err(SessionError::DuplicateToolResult(id.to_string()));
                }
            }
            Role::Assistant => {
                let mut seen = HashSet::new();
                for call in &message.tool_calls {
                    if !seen.insert(call.id.as_str()) || self.has_call_id(&call.id) {
                        return Err(SessionError::DuplicateToolCallId(call.id.clone()));
                    }
                }
            }
            Role::User | Role::System => {}
        }
        self.messages.push(message);
        self.touch();
        Ok(())
    }

    /// 合并附件；集合有变化时返回 true
    pub fn merge_files(&mut self, files: &[FileAttachment]) -> bool {
        let mut changed = false;
        for file in files {
            if self.files.get(&file.name) != Some(file) {
                self.files.insert(file.name.clone(), file.clone());
                changed = true;
            }
        }
        if changed {
            self.touch();
        }
        changed
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
