//! 事件发布抽象
//!
//! 编排器只面对 `EventPublisher`，不关心事件最终走 WebSocket、SSE 还是标准输出。
//! 传输已断开时 publish 返回 `Discarded`，轮次照常完成。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use super::event::ChatEvent;
use crate::session::FileAttachment;

/// 发布结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAck {
    Delivered,
    /// 传输已不可用，事件被丢弃
    Discarded,
}

/// 事件发布者：同一发布者上的事件保持 FIFO
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ChatEvent) -> PublishAck;

    /// 推送一段最终助手文本
    async fn publish_text(&self, message: String) -> PublishAck {
        self.publish(ChatEvent::ChatResponse {
            message,
            has_pending_tools: false,
            tool_calls: Vec::new(),
            sources: Vec::new(),
        })
        .await
    }

    async fn publish_files(&self, files: Vec<FileAttachment>) -> PublishAck {
        self.publish(ChatEvent::FilesUpdated { files }).await
    }

    async fn publish_custom(&self, payload: Value) -> PublishAck {
        self.publish(ChatEvent::Custom { payload }).await
    }

    async fn publish_error(&self, code: &str, message: String) -> PublishAck {
        self.publish(ChatEvent::Error {
            code: code.to_string(),
            message,
        })
        .await
    }
}

/// 单轮内使用的发布包装：统计事件数，首次丢弃时记录一条告警
pub struct TrackedPublisher<'a> {
    inner: &'a dyn EventPublisher,
    session_id: &'a str,
    published: AtomicUsize,
    discarding: AtomicBool,
}

impl<'a> TrackedPublisher<'a> {
    pub fn new(inner: &'a dyn EventPublisher, session_id: &'a str) -> Self {
        Self {
            inner,
            session_id,
            published: AtomicUsize::new(0),
            discarding: AtomicBool::new(false),
        }
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }

    pub fn is_discarding(&self) -> bool {
        self.discarding.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for TrackedPublisher<'_> {
    async fn publish(&self, event: ChatEvent) -> PublishAck {
        let kind = event.kind();
        let ack = self.inner.publish(event).await;
        self.published.fetch_add(1, Ordering::Relaxed);
        if ack == PublishAck::Discarded && !self.discarding.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                session_id = %self.session_id,
                event = kind,
                "Publisher is discarding events, continuing turn without client"
            );
        }
        ack
    }
}
