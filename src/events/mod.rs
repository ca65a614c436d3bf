//! 事件层：轮次更新事件、发布者抽象与传输适配器

pub mod adapters;
pub mod event;
pub mod publisher;

pub use adapters::{ChannelPublisher, JsonLinesPublisher, NullPublisher};
pub use event::ChatEvent;
pub use publisher::{EventPublisher, PublishAck, TrackedPublisher};
