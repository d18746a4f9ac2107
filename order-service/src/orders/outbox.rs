//! Outbox Relay - 重投未确认的领域事件
//!
//! 请求路径在提交后立即投递一次；失败或进程在投递前退出的事件
//! 留在 outbox 中，由这里按指数退避重试，直到所有 topic 订阅方确认。
//! 新订阅方注册时立即重放全部积压事件，不等待退避。
//! 条目永不丢弃：没有重试上限，也没有死信队列。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::storage::{OrderStorage, OutboxEntry};
use crate::message::EventPublisher;

/// Exponential backoff for failed deliveries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        shared::util::backoff_delay(self.base, self.max, retry_count)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Deliver one outbox entry; returns whether the bus acknowledged it
pub async fn deliver(
    storage: &OrderStorage,
    publisher: &dyn EventPublisher,
    policy: RetryPolicy,
    entry: &OutboxEntry,
) -> bool {
    let key = entry.key();
    match publisher.publish(&entry.event).await {
        Ok(()) => {
            if let Err(e) = storage.acknowledge(&key) {
                // 未删除的条目会被再次投递，订阅端去重
                tracing::error!(outbox_key = %key, error = %e, "Failed to acknowledge outbox entry");
            }
            true
        }
        Err(e) => {
            let delay = policy.delay_for(entry.retry_count);
            tracing::warn!(
                order_id = %entry.event.order_id,
                event_type = %entry.event.event_type,
                retry_count = entry.retry_count,
                retry_in_ms = delay.as_millis() as u64,
                error = %e,
                "Event publish failed, kept in outbox"
            );
            if let Err(e2) = storage.mark_failed(&key, &e.to_string(), delay) {
                tracing::error!(outbox_key = %key, error = %e2, "Failed to record publish failure");
            }
            false
        }
    }
}

pub struct OutboxRelay {
    storage: OrderStorage,
    publisher: Arc<dyn EventPublisher>,
    policy: RetryPolicy,
    scan_interval: Duration,
    wakeup: Arc<Notify>,
}

impl OutboxRelay {
    pub fn new(
        storage: OrderStorage,
        publisher: Arc<dyn EventPublisher>,
        policy: RetryPolicy,
        scan_interval: Duration,
    ) -> Self {
        Self {
            storage,
            publisher,
            policy,
            scan_interval,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Replay the whole backlog whenever `wakeup` fires
    pub fn with_wakeup(mut self, wakeup: Arc<Notify>) -> Self {
        self.wakeup = wakeup;
        self
    }

    /// Run until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            scan_interval_secs = self.scan_interval.as_secs(),
            "OutboxRelay started"
        );

        // 上次运行遗留的事件
        self.process_pending().await;

        let mut scan_interval = tokio::time::interval(self.scan_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("OutboxRelay shutting down");
                    break;
                }
                _ = scan_interval.tick() => {
                    self.process_pending().await;
                }
                _ = self.wakeup.notified() => {
                    self.replay_pending().await;
                }
            }
        }
    }

    /// Deliver every due entry; returns how many were acknowledged
    pub async fn process_pending(&self) -> usize {
        self.relay(false).await
    }

    /// Deliver every pending entry regardless of backoff
    pub async fn replay_pending(&self) -> usize {
        self.relay(true).await
    }

    async fn relay(&self, ignore_backoff: bool) -> usize {
        let pending = match self.storage.pending_events() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read outbox");
                return 0;
            }
        };

        let now = shared::util::now_millis();
        let due: Vec<&OutboxEntry> = pending
            .iter()
            .filter(|e| ignore_backoff || e.is_due(now))
            .collect();
        if due.is_empty() {
            return 0;
        }

        tracing::info!(
            due = due.len(),
            pending = pending.len(),
            replay = ignore_backoff,
            "Relaying outbox events"
        );

        let mut delivered = 0;
        for entry in due {
            if deliver(&self.storage, self.publisher.as_ref(), self.policy, entry).await {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PublishError;
    use async_trait::async_trait;
    use shared::models::{DomainEvent, Order, OrderItem, OrderStatus};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Publisher that can be switched between failing and accepting
    #[derive(Default)]
    struct FlakyPublisher {
        up: AtomicBool,
        delivered: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventPublisher for FlakyPublisher {
        async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
            if !self.up.load(Ordering::SeqCst) {
                return Err(PublishError::Unreachable("down".into()));
            }
            self.delivered.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn order(id: &str) -> Order {
        Order {
            id: id.into(),
            user_id: "u-1".into(),
            items: vec![OrderItem::new("p1", 1)],
            total: 1.0,
            address: "a".into(),
            status: OrderStatus::Created,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_failed_entries_retried_until_acknowledged() {
        let storage = OrderStorage::open_in_memory().unwrap().with_relay_grace(Duration::ZERO);
        let publisher = Arc::new(FlakyPublisher::default());
        let policy = RetryPolicy {
            base: Duration::ZERO,
            max: Duration::ZERO,
        };
        let relay = OutboxRelay::new(storage.clone(), publisher.clone(), policy, Duration::from_secs(60));

        storage.insert_order(&order("o-1")).unwrap();

        // 总线不可达：条目保留且重试次数递增
        assert_eq!(relay.process_pending().await, 0);
        assert_eq!(relay.process_pending().await, 0);
        let pending = storage.pending_events().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 2);
        assert!(pending[0].last_error.is_some());

        publisher.up.store(true, Ordering::SeqCst);
        assert_eq!(relay.process_pending().await, 1);
        assert_eq!(storage.pending_count().unwrap(), 0);
        assert_eq!(publisher.delivered.lock().unwrap()[0].order_id, "o-1");
    }

    #[tokio::test]
    async fn test_backoff_respected() {
        let storage = OrderStorage::open_in_memory().unwrap().with_relay_grace(Duration::ZERO);
        let publisher = Arc::new(FlakyPublisher::default());
        let relay = OutboxRelay::new(
            storage.clone(),
            publisher.clone(),
            RetryPolicy::default(),
            Duration::from_secs(60),
        );

        storage.insert_order(&order("o-1")).unwrap();
        relay.process_pending().await;

        // 下一次尝试在 1s 之后
        publisher.up.store(true, Ordering::SeqCst);
        assert_eq!(relay.process_pending().await, 0);
        assert_eq!(storage.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replay_ignores_backoff() {
        let storage = OrderStorage::open_in_memory().unwrap().with_relay_grace(Duration::ZERO);
        let publisher = Arc::new(FlakyPublisher::default());
        let relay = OutboxRelay::new(
            storage.clone(),
            publisher.clone(),
            RetryPolicy::default(),
            Duration::from_secs(60),
        );

        storage.insert_order(&order("o-1")).unwrap();
        relay.process_pending().await;

        publisher.up.store(true, Ordering::SeqCst);
        assert_eq!(relay.replay_pending().await, 1);
        assert_eq!(storage.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_policy_caps_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }
}
