//! Order lifecycle domain events
//!
//! 每次成功的状态迁移产生一条事件，发出后不可变。
//! 订阅方按 (order_id, event_type) 去重。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::order::{Order, OrderItem, OrderStatus};

pub const TOPIC_ORDER_CREATED: &str = "order.created";
pub const TOPIC_ORDER_APPROVED: &str = "order.approved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainEventType {
    OrderCreated,
    OrderApproved,
}

impl DomainEventType {
    /// Bus topic the event is published on
    pub fn topic(&self) -> &'static str {
        match self {
            DomainEventType::OrderCreated => TOPIC_ORDER_CREATED,
            DomainEventType::OrderApproved => TOPIC_ORDER_APPROVED,
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            TOPIC_ORDER_CREATED => Some(DomainEventType::OrderCreated),
            TOPIC_ORDER_APPROVED => Some(DomainEventType::OrderApproved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEventType::OrderCreated => "OrderCreated",
            DomainEventType::OrderApproved => "OrderApproved",
        }
    }
}

impl fmt::Display for DomainEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload carried on `order.created` / `order.approved`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: DomainEventType,
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub total: f64,
    pub address: String,
    pub status: OrderStatus,
}

impl DomainEvent {
    pub fn from_order(event_type: DomainEventType, order: &Order) -> Self {
        Self {
            event_type,
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            items: order.items.clone(),
            total: order.total,
            address: order.address.clone(),
            status: order.status,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.event_type.topic()
    }

    /// Idempotency key shared by the outbox and subscribers
    pub fn dedupe_key(&self) -> String {
        dedupe_key(&self.order_id, self.event_type)
    }
}

pub fn dedupe_key(order_id: &str, event_type: DomainEventType) -> String {
    format!("{}:{}", order_id, event_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        assert_eq!(DomainEventType::OrderCreated.topic(), "order.created");
        assert_eq!(
            DomainEventType::from_topic("order.approved"),
            Some(DomainEventType::OrderApproved)
        );
        assert_eq!(DomainEventType::from_topic("order.shipped"), None);
    }

    #[test]
    fn test_dedupe_key() {
        assert_eq!(
            dedupe_key("o-1", DomainEventType::OrderApproved),
            "o-1:OrderApproved"
        );
    }
}
