//! 消息总线核心实现
//!
//! ```text
//! OrdersManager / OutboxRelay
//!          │ publish()
//!          ▼
//! ┌──────────────────────────────────┐
//! │            MessageBus            │
//! └───────┬──────────────────┬───────┘
//!         ▼                  ▼
//!  topic 订阅方 (mpsc)     观察者 (broadcast)
//!  TCP forwarder /          审计日志等，
//!  进程内消费者              不参与确认
//! ```
//!
//! 只有 topic 订阅方的确认才算投递成功：每个匹配的订阅方都必须在
//! `ack_timeout` 内确认，否则事件留在 outbox 中由 relay 重投。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use shared::message::BusMessage;
use shared::models::DomainEvent;
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{EventPublisher, PublishError};

/// Configuration for transport layer
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tcp_listen_addr: String,
    /// Capacity of the observer broadcast channel (default: 1024)
    pub channel_capacity: usize,
    /// 每个 topic 订阅方的待确认队列长度
    pub subscriber_queue: usize,
    /// 等待订阅方确认的时间
    pub ack_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_listen_addr: "0.0.0.0:4222".to_string(),
            channel_capacity: 1024,
            subscriber_queue: 256,
            ack_timeout: Duration::from_secs(2),
        }
    }
}

/// Connected external subscriber
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub id: String,
    pub name: Option<String>,
    pub addr: String,
    pub topics: Vec<String>,
}

/// 一条等待订阅方确认的事件
#[derive(Debug)]
pub struct Delivery {
    pub message: BusMessage,
    ack: oneshot::Sender<()>,
}

impl Delivery {
    /// 订阅方已经接收 (TCP: 帧已写出；进程内: 已取出)
    pub fn ack(self) -> BusMessage {
        let _ = self.ack.send(());
        self.message
    }
}

#[derive(Debug)]
struct TopicSubscriber {
    /// 空列表表示全部 topic
    topics: Vec<String>,
    tx: mpsc::Sender<Delivery>,
}

impl TopicSubscriber {
    fn wants(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| t == topic)
    }
}

type Registry = Arc<DashMap<String, TopicSubscriber>>;

/// Registered topic subscriber; unregisters on drop
#[derive(Debug)]
pub struct Subscription {
    id: String,
    topics: Vec<String>,
    rx: mpsc::Receiver<Delivery>,
    registry: Registry,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Next delivery; `None` once the bus shut down
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// 消息总线 - 负责领域事件的扇出
#[derive(Debug, Clone)]
pub struct MessageBus {
    observer_tx: broadcast::Sender<BusMessage>,
    pub(crate) config: TransportConfig,
    shutdown_token: CancellationToken,
    subscribers: Registry,
    /// 新订阅方注册时唤醒 outbox relay
    joined: Arc<Notify>,
    /// 已连接的外部订阅方 (Client ID -> 信息)
    pub(crate) clients: Arc<DashMap<String, ConnectedClient>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::from_config(TransportConfig::default())
    }

    pub fn from_config(config: TransportConfig) -> Self {
        let (observer_tx, _) = broadcast::channel(config.channel_capacity);
        Self {
            observer_tx,
            config,
            shutdown_token: CancellationToken::new(),
            subscribers: Arc::new(DashMap::new()),
            joined: Arc::new(Notify::new()),
            clients: Arc::new(DashMap::new()),
        }
    }

    /// Register a topic subscriber whose acknowledgements count as delivery
    pub fn register<S: Into<String>>(&self, topics: impl IntoIterator<Item = S>) -> Subscription {
        self.register_as(shared::util::new_id(), topics.into_iter().map(Into::into).collect())
    }

    pub(crate) fn register_as(&self, id: String, topics: Vec<String>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue.max(1));
        self.subscribers.insert(
            id.clone(),
            TopicSubscriber {
                topics: topics.clone(),
                tx,
            },
        );
        tracing::debug!(subscriber_id = %id, topics = ?topics, "Topic subscriber registered");
        self.joined.notify_one();

        Subscription {
            id,
            topics,
            rx,
            registry: self.subscribers.clone(),
        }
    }

    /// 观察全部事件 (进程内)；观察者不参与投递确认
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.observer_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observer_tx.receiver_count()
    }

    /// Fires whenever a topic subscriber registers
    pub fn subscriber_joined(&self) -> Arc<Notify> {
        self.joined.clone()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    pub fn get_connected_clients(&self) -> Vec<ConnectedClient> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }

    /// 优雅关闭消息总线
    pub fn shutdown(&self) {
        tracing::info!("Shutting down message bus");
        self.shutdown_token.cancel();
        // 释放发送端，订阅方的 recv() 随之结束
        self.subscribers.clear();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for MessageBus {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let msg = BusMessage::event(event)?;
        let topic = event.topic();

        let observers = self.observer_tx.send(msg.clone()).unwrap_or(0);

        let targets: Vec<(String, mpsc::Sender<Delivery>)> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().wants(topic))
            .map(|entry| (entry.key().clone(), entry.value().tx.clone()))
            .collect();
        if targets.is_empty() {
            return Err(PublishError::Unreachable(format!("no subscriber for {topic}")));
        }

        let mut waiting = Vec::with_capacity(targets.len());
        for (id, tx) in &targets {
            let (ack_tx, ack_rx) = oneshot::channel();
            let delivery = Delivery {
                message: msg.clone(),
                ack: ack_tx,
            };
            match tx.try_send(delivery) {
                Ok(()) => waiting.push(ack_rx),
                Err(e) => {
                    tracing::warn!(subscriber_id = %id, topic, "Subscriber queue rejected event: {e}");
                }
            }
        }

        let ack_timeout = self.config.ack_timeout;
        let acked = futures::future::join_all(
            waiting
                .into_iter()
                .map(|rx| tokio::time::timeout(ack_timeout, rx)),
        )
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(()))))
        .count();

        tracing::debug!(
            order_id = %event.order_id,
            event_type = %event.event_type,
            topic,
            subscribers = targets.len(),
            acked,
            observers,
            "Event published"
        );

        if acked < targets.len() {
            return Err(PublishError::Unacknowledged {
                acked,
                total: targets.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::message::EventType;
    use shared::models::{DomainEventType, OrderItem, OrderStatus};

    fn event() -> DomainEvent {
        DomainEvent {
            event_type: DomainEventType::OrderCreated,
            order_id: "o-1".into(),
            user_id: "u-1".into(),
            items: vec![OrderItem::new("p1", 1)],
            total: 1.0,
            address: "a".into(),
            status: OrderStatus::Created,
        }
    }

    fn quick_bus() -> MessageBus {
        MessageBus::from_config(TransportConfig {
            ack_timeout: Duration::from_millis(50),
            ..TransportConfig::default()
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_unreachable() {
        let bus = MessageBus::new();
        assert!(matches!(bus.publish(&event()).await, Err(PublishError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_observer_does_not_acknowledge() {
        let bus = MessageBus::new();
        let mut observer = bus.subscribe();

        // 观察者收到了事件，但投递仍然失败
        assert!(matches!(bus.publish(&event()).await, Err(PublishError::Unreachable(_))));
        assert_eq!(observer.recv().await.unwrap().event_type, EventType::OrderCreated);
    }

    #[tokio::test]
    async fn test_publish_waits_for_ack() {
        let bus = MessageBus::new();
        let mut sub = bus.register(["order.created"]);
        let consumer = tokio::spawn(async move {
            let delivery = sub.recv().await.unwrap();
            delivery.ack()
        });

        bus.publish(&event()).await.unwrap();

        let msg = consumer.await.unwrap();
        assert_eq!(msg.event_type, EventType::OrderCreated);
        assert_eq!(msg.parse_payload::<DomainEvent>().unwrap(), event());
    }

    #[tokio::test]
    async fn test_unacknowledged_delivery_fails() {
        let bus = quick_bus();
        let _idle = bus.register(["order.created"]);

        let err = bus.publish(&event()).await.unwrap_err();
        assert!(matches!(err, PublishError::Unacknowledged { acked: 0, total: 1 }));
    }

    #[tokio::test]
    async fn test_other_topic_subscriber_not_counted() {
        let bus = quick_bus();
        let _approvals = bus.register(["order.approved"]);
        assert!(matches!(bus.publish(&event()).await, Err(PublishError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_dropped_subscription_unregisters() {
        let bus = MessageBus::new();
        let sub = bus.register(Vec::<String>::new());
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
