//! 会话存储抽象层
//!
//! 编排器只依赖 `SessionStore` 契约（get / create / update / delete / exists），不关心底层存储；
//! 内置 `MemorySessionStore` 作为默认实现。

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::Session;

/// 会话存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session store backend error: {0}")]
    Backend(String),
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError>;

    async fn create(&self, session: Session) -> Result<Session, StoreError>;

    /// 整体替换已有会话
    async fn update(&self, session: Session) -> Result<Session, StoreError>;

    /// 删除会话；不存在时返回 false
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn exists(&self, id: &str) -> Result<bool, StoreError>;
}

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::AlreadyExists(session.id));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn update(&self, session: Session) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(session)
            }
            None => Err(StoreError::NotFound(session.id)),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.read().await.contains_key(id))
    }
}
