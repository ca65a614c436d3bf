//! 发布者适配器：通道（WebSocket / SSE 处理器消费）、JSON Lines 写出、空发布者

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use super::event::ChatEvent;
use super::publisher::{EventPublisher, PublishAck};

/// 把事件送入无界通道，由传输层任务取出再写到连接上
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self { tx }
    }

    /// 新建发布者与对应的接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, event: ChatEvent) -> PublishAck {
        match self.tx.send(event) {
            Ok(()) => PublishAck::Delivered,
            Err(_) => PublishAck::Discarded,
        }
    }
}

/// 每个事件写成一行 JSON（如命令行场景下写到 stdout）
pub struct JsonLinesPublisher<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventPublisher for JsonLinesPublisher<W> {
    async fn publish(&self, event: ChatEvent) -> PublishAck {
        let mut line = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, event = event.kind(), "Failed to serialize event");
                return PublishAck::Discarded;
            }
        };
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;
        match written {
            Ok(()) => PublishAck::Delivered,
            Err(_) => PublishAck::Discarded,
        }
    }
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, _event: ChatEvent) -> PublishAck {
        PublishAck::Discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_publisher_reports_closed_receiver() {
        let (publisher, rx) = ChannelPublisher::channel();
        assert_eq!(
            publisher.publish_text("a".into()).await,
            PublishAck::Delivered
        );
        drop(rx);
        assert_eq!(
            publisher.publish_text("b".into()).await,
            PublishAck::Discarded
        );
    }

    #[tokio::test]
    async fn test_json_lines_one_event_per_line() {
        let publisher = JsonLinesPublisher::new(Vec::<u8>::new());
        publisher.publish_text("hello".into()).await;
        publisher
            .publish(ChatEvent::ResponseComplete { steps: 1 })
            .await;
        let out = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "chat_response");
        assert_eq!(first["message"], "hello");
        assert!(lines[1].contains("response_complete"));
    }
}
