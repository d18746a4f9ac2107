//! 幂等订阅端
//!
//! at-least-once 投递下同一事件可能到达多次 (请求路径与 relay 同时投递、
//! 进程重启后重放 outbox)。这里按 `order_id:EventType` 去重。

use std::sync::Arc;

use dashmap::DashSet;
use shared::message::BusMessage;
use shared::models::{DomainEvent, DomainEventType};
use tokio::sync::broadcast;

use super::bus::Subscription;

enum Source {
    /// 已注册的 topic 订阅方，取出即确认
    Topic(Subscription),
    /// 只观察，不参与确认 (审计日志)
    Observer(broadcast::Receiver<BusMessage>),
}

impl Source {
    async fn recv(&mut self) -> Option<BusMessage> {
        match self {
            Source::Topic(sub) => sub.recv().await.map(|delivery| delivery.ack()),
            Source::Observer(rx) => loop {
                match rx.recv().await {
                    Ok(msg) => return Some(msg),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(dropped_messages = n, "Observer lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }
}

pub struct IdempotentSubscriber {
    source: Source,
    /// 空集合表示接收全部 topic
    topics: Vec<DomainEventType>,
    seen: Arc<DashSet<String>>,
}

impl IdempotentSubscriber {
    /// Consume a registered subscription; its topics drive the filter
    pub fn new(subscription: Subscription) -> Self {
        let topics = parse_topics(subscription.topics().iter().map(String::as_str));
        Self::with_source(Source::Topic(subscription), topics)
    }

    /// Watch the bus without taking part in delivery acknowledgement
    pub fn observe(rx: broadcast::Receiver<BusMessage>, topics: &[&str]) -> Self {
        Self::with_source(Source::Observer(rx), parse_topics(topics.iter().copied()))
    }

    fn with_source(source: Source, topics: Vec<DomainEventType>) -> Self {
        Self {
            source,
            topics,
            seen: Arc::new(DashSet::new()),
        }
    }

    /// 与另一个订阅端共享去重集合 (同一服务的多个消费任务)
    pub fn with_seen(mut self, seen: Arc<DashSet<String>>) -> Self {
        self.seen = seen;
        self
    }

    fn wants(&self, event_type: DomainEventType) -> bool {
        self.topics.is_empty() || self.topics.contains(&event_type)
    }

    /// Next event not seen before; `None` once the bus is closed
    pub async fn next(&mut self) -> Option<DomainEvent> {
        loop {
            let msg = self.source.recv().await?;

            if msg.topic().is_none() {
                continue;
            }
            let event: DomainEvent = match msg.parse_payload() {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(request_id = %msg.request_id, error = %e, "Dropping malformed event");
                    continue;
                }
            };
            if !self.wants(event.event_type) {
                continue;
            }

            if !self.seen.insert(event.dedupe_key()) {
                tracing::debug!(
                    order_id = %event.order_id,
                    event_type = %event.event_type,
                    "Duplicate event ignored"
                );
                continue;
            }
            return Some(event);
        }
    }

    /// Drain events into `handler` until the bus closes
    pub async fn run<F>(mut self, mut handler: F)
    where
        F: FnMut(DomainEvent) + Send,
    {
        while let Some(event) = self.next().await {
            handler(event);
        }
        tracing::debug!("Subscriber stopped: bus closed");
    }
}

fn parse_topics<'a>(topics: impl Iterator<Item = &'a str>) -> Vec<DomainEventType> {
    topics.filter_map(DomainEventType::from_topic).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EventPublisher, MessageBus};
    use shared::models::{OrderItem, OrderStatus};

    fn event(order_id: &str, event_type: DomainEventType) -> DomainEvent {
        DomainEvent {
            event_type,
            order_id: order_id.into(),
            user_id: "u-1".into(),
            items: vec![OrderItem::new("p1", 1)],
            total: 1.0,
            address: "a".into(),
            status: OrderStatus::Created,
        }
    }

    #[tokio::test]
    async fn test_duplicates_dropped() {
        let bus = MessageBus::new();
        let mut sub = IdempotentSubscriber::observe(bus.subscribe(), &[]);

        let created = event("o-1", DomainEventType::OrderCreated);
        let approved = event("o-1", DomainEventType::OrderApproved);
        let _ = bus.publish(&created).await;
        let _ = bus.publish(&created).await;
        let _ = bus.publish(&approved).await;

        assert_eq!(sub.next().await.unwrap(), created);
        assert_eq!(sub.next().await.unwrap(), approved);
    }

    #[tokio::test]
    async fn test_topic_subscription_acknowledges() {
        let bus = MessageBus::new();
        let mut sub = IdempotentSubscriber::new(bus.register(["order.approved"]));
        let consumer = tokio::spawn(async move { sub.next().await });

        bus.publish(&event("o-1", DomainEventType::OrderApproved)).await.unwrap();
        let received = consumer.await.unwrap().unwrap();
        assert_eq!(received.event_type, DomainEventType::OrderApproved);
    }

    #[tokio::test]
    async fn test_topic_filter() {
        let bus = MessageBus::new();
        let mut sub = IdempotentSubscriber::observe(bus.subscribe(), &["order.approved"]);

        let _ = bus.publish(&event("o-1", DomainEventType::OrderCreated)).await;
        let _ = bus.publish(&event("o-1", DomainEventType::OrderApproved)).await;

        assert_eq!(sub.next().await.unwrap().event_type, DomainEventType::OrderApproved);
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let bus = MessageBus::new();
        let mut sub = IdempotentSubscriber::new(bus.register(Vec::<String>::new()));
        bus.shutdown();
        assert!(sub.next().await.is_none());
    }
}
