//! Event bus integration
//!
//! # 结构
//!
//! - [`bus`] - 总线与 topic 订阅方注册 ([`MessageBus`])
//! - [`tcp_server`] - 外部订阅方的 TCP 扇出
//! - [`subscriber`] - 按 (order_id, event_type) 去重的订阅端
//!
//! 投递语义为 at-least-once：事件先写入 outbox，所有匹配的 topic 订阅方
//! 确认后才从 outbox 删除，订阅端必须幂等。

pub mod bus;
pub mod subscriber;
pub mod tcp_server;

pub use bus::{Delivery, MessageBus, Subscription, TransportConfig};
pub use subscriber::IdempotentSubscriber;

use async_trait::async_trait;
use shared::models::DomainEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    /// 没有该 topic 的订阅方，事件留在 outbox 中等待重试
    #[error("event bus unreachable: {0}")]
    Unreachable(String),

    /// 部分订阅方没有在超时内确认
    #[error("{acked} of {total} subscribers acknowledged")]
    Unacknowledged { acked: usize, total: usize },

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publish contract used by the order lifecycle
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}
