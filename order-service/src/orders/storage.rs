//! redb-based order storage
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `Order` (JSON) | 订单记录 |
//! | `user_orders` | `user_id` | `created_at:order_id` (multimap) | 按用户索引，按创建时间排序 |
//! | `outbox` | `order_id:EventType` | `OutboxEntry` (JSON) | 待投递事件 |
//!
//! # Atomicity
//!
//! 状态迁移与对应的 outbox 记录写在同一个写事务里。redb 串行化写事务，
//! 事务内 "读当前状态 → 校验 → 写新状态" 就是一次 compare-and-swap：
//! 并发的 approve 与 cancel 中只有一个能看到 Created。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{
    Database, MultimapTableDefinition, ReadableDatabase, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata, TableDefinition, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use shared::models::{DomainEvent, DomainEventType, Order, OrderStatus, OrderTransition};
use thiserror::Error;

const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

const USER_ORDERS_TABLE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("user_orders");

/// key = "order_id:EventType", value = JSON-serialized OutboxEntry
const OUTBOX_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("outbox");

/// 定长时间前缀保证 multimap 内按创建时间排序
fn index_value(order: &Order) -> String {
    format!("{:020}:{}", order.created_at.max(0), order.id)
}

/// Outbox entry awaiting acknowledgement from the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub event: DomainEvent,
    pub created_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// 下次允许投递的时间 (毫秒)
    pub next_attempt_at: i64,
}

impl OutboxEntry {
    pub fn key(&self) -> String {
        self.event.dedupe_key()
    }

    pub fn is_due(&self, now_millis: i64) -> bool {
        now_millis >= self.next_attempt_at
    }
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} is {current}, cannot {transition}")]
    InvalidTransition {
        order_id: String,
        current: OrderStatus,
        transition: OrderTransition,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Order storage backed by redb
#[derive(Clone)]
pub struct OrderStorage {
    db: Arc<Database>,
    /// 首次投递留给请求路径的窗口，超过后由 relay 接手
    relay_grace: Duration,
}

impl OrderStorage {
    pub const DEFAULT_RELAY_GRACE: Duration = Duration::from_secs(1);

    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::init(Database::create(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_multimap_table(USER_ORDERS_TABLE)?;
            let _ = write_txn.open_table(OUTBOX_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            relay_grace: Self::DEFAULT_RELAY_GRACE,
        })
    }

    pub fn with_relay_grace(mut self, grace: Duration) -> Self {
        self.relay_grace = grace;
        self
    }

    // ========== Orders ==========

    /// Persist a new order and its `OrderCreated` outbox entry in one transaction
    pub fn insert_order(&self, order: &Order) -> StorageResult<OutboxEntry> {
        let txn = self.db.begin_write()?;
        {
            let mut orders = txn.open_table(ORDERS_TABLE)?;
            let value = serde_json::to_vec(order)?;
            orders.insert(order.id.as_str(), value.as_slice())?;

            let mut index = txn.open_multimap_table(USER_ORDERS_TABLE)?;
            index.insert(order.user_id.as_str(), index_value(order).as_str())?;
        }
        let entry = self.enqueue_event(&txn, DomainEvent::from_order(DomainEventType::OrderCreated, order))?;
        txn.commit()?;
        Ok(entry)
    }

    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Guarded status transition (CAS)
    ///
    /// 返回迁移后的订单；若迁移产生事件 (approve)，同一事务内写入 outbox。
    pub fn transition(
        &self,
        order_id: &str,
        transition: OrderTransition,
    ) -> StorageResult<(Order, Option<OutboxEntry>)> {
        let txn = self.db.begin_write()?;
        let order = {
            let mut table = txn.open_table(ORDERS_TABLE)?;
            let mut order: Order = match table.get(order_id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StorageError::OrderNotFound(order_id.to_string())),
            };

            let target = order.status.apply(transition).ok_or_else(|| {
                StorageError::InvalidTransition {
                    order_id: order_id.to_string(),
                    current: order.status,
                    transition,
                }
            })?;

            order.status = target;
            order.updated_at = shared::util::now_millis();
            let value = serde_json::to_vec(&order)?;
            table.insert(order_id, value.as_slice())?;
            order
        };

        let entry = match transition {
            OrderTransition::Approve => Some(self.enqueue_event(
                &txn,
                DomainEvent::from_order(DomainEventType::OrderApproved, &order),
            )?),
            OrderTransition::Cancel => None,
        };

        txn.commit()?;
        Ok((order, entry))
    }

    /// All order ids, or those belonging to `user_id`
    ///
    /// 只返回 id；订单本身在消费时逐条读取。
    pub fn list_order_ids(&self, user_id: Option<&str>) -> StorageResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let mut ids = Vec::new();
        match user_id {
            Some(user_id) => {
                let index = read_txn.open_multimap_table(USER_ORDERS_TABLE)?;
                for value in index.get(user_id)? {
                    let value = value?;
                    if let Some((_, order_id)) = value.value().split_once(':') {
                        ids.push(order_id.to_string());
                    }
                }
            }
            None => {
                let table = read_txn.open_table(ORDERS_TABLE)?;
                for result in table.iter()? {
                    let (key, _) = result?;
                    ids.push(key.value().to_string());
                }
            }
        }
        Ok(ids)
    }

    pub fn order_count(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        Ok(table.len()?)
    }

    // ========== Outbox ==========

    fn enqueue_event(&self, txn: &WriteTransaction, event: DomainEvent) -> StorageResult<OutboxEntry> {
        let now = shared::util::now_millis();
        let entry = OutboxEntry {
            event,
            created_at: now,
            retry_count: 0,
            last_error: None,
            next_attempt_at: now + self.relay_grace.as_millis() as i64,
        };
        let mut table = txn.open_table(OUTBOX_TABLE)?;
        let value = serde_json::to_vec(&entry)?;
        table.insert(entry.key().as_str(), value.as_slice())?;
        Ok(entry)
    }

    /// All entries still awaiting acknowledgement
    pub fn pending_events(&self) -> StorageResult<Vec<OutboxEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    pub fn pending_count(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;
        Ok(table.len()?)
    }

    /// Bus accepted the event: drop it from the outbox
    pub fn acknowledge(&self, key: &str) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(OUTBOX_TABLE)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Record a failed delivery and schedule the next attempt
    pub fn mark_failed(&self, key: &str, error: &str, delay: Duration) -> StorageResult<Option<OutboxEntry>> {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut table = txn.open_table(OUTBOX_TABLE)?;
            let entry: Option<OutboxEntry> = match table.get(key)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };

            match entry {
                Some(mut entry) => {
                    entry.retry_count += 1;
                    entry.last_error = Some(error.to_string());
                    entry.next_attempt_at = shared::util::now_millis() + delay.as_millis() as i64;
                    let value = serde_json::to_vec(&entry)?;
                    table.insert(key, value.as_slice())?;
                    Some(entry)
                }
                // 已被另一路投递确认
                None => None,
            }
        };
        txn.commit()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::OrderItem;

    fn order(id: &str, user_id: &str) -> Order {
        Order {
            id: id.to_string(),
            user_id: user_id.to_string(),
            items: vec![OrderItem::new("p1", 2)],
            total: 10.0,
            address: "Main St 1".to_string(),
            status: OrderStatus::Created,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_insert_writes_outbox() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let entry = storage.insert_order(&order("o-1", "u-1")).unwrap();

        assert_eq!(entry.event.event_type, DomainEventType::OrderCreated);
        assert_eq!(entry.key(), "o-1:OrderCreated");
        assert_eq!(storage.pending_events().unwrap(), vec![entry]);
        assert_eq!(storage.get_order("o-1").unwrap().unwrap().user_id, "u-1");
    }

    #[test]
    fn test_transition_guards() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.insert_order(&order("o-1", "u-1")).unwrap();

        let (approved, entry) = storage.transition("o-1", OrderTransition::Approve).unwrap();
        assert_eq!(approved.status, OrderStatus::Approved);
        assert_eq!(entry.unwrap().event.status, OrderStatus::Approved);

        let err = storage.transition("o-1", OrderTransition::Approve).unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidTransition { current: OrderStatus::Approved, .. }
        ));

        let (cancelled, entry) = storage.transition("o-1", OrderTransition::Cancel).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(entry.is_none());

        assert!(matches!(
            storage.transition("o-1", OrderTransition::Cancel),
            Err(StorageError::InvalidTransition { .. })
        ));
        assert!(matches!(
            storage.transition("missing", OrderTransition::Cancel),
            Err(StorageError::OrderNotFound(_))
        ));
    }

    #[test]
    fn test_rejected_transition_leaves_record() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.insert_order(&order("o-1", "u-1")).unwrap();
        storage.transition("o-1", OrderTransition::Cancel).unwrap();
        let before = storage.get_order("o-1").unwrap().unwrap();

        let _ = storage.transition("o-1", OrderTransition::Approve);
        assert_eq!(storage.get_order("o-1").unwrap().unwrap(), before);
        // 只有 OrderCreated 在 outbox 中
        assert_eq!(storage.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_list_by_user() {
        let storage = OrderStorage::open_in_memory().unwrap();
        storage.insert_order(&order("o-1", "u-1")).unwrap();
        storage.insert_order(&order("o-2", "u-2")).unwrap();
        storage.insert_order(&order("o-3", "u-1")).unwrap();

        let mut later = order("o-0", "u-1");
        later.created_at = 5;
        storage.insert_order(&later).unwrap();

        // 按创建时间排序，而不是按 id
        let ids = storage.list_order_ids(Some("u-1")).unwrap();
        assert_eq!(ids, vec!["o-1", "o-3", "o-0"]);
        assert!(storage.list_order_ids(Some("u-9")).unwrap().is_empty());
        assert_eq!(storage.list_order_ids(None).unwrap().len(), 4);
        assert_eq!(storage.order_count().unwrap(), 4);
    }

    #[test]
    fn test_mark_failed_and_acknowledge() {
        let storage = OrderStorage::open_in_memory().unwrap();
        let entry = storage.insert_order(&order("o-1", "u-1")).unwrap();

        let failed = storage
            .mark_failed(&entry.key(), "no subscribers", Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("no subscribers"));
        assert!(!failed.is_due(shared::util::now_millis()));

        storage.acknowledge(&entry.key()).unwrap();
        assert_eq!(storage.pending_count().unwrap(), 0);
        assert!(storage.mark_failed(&entry.key(), "late", Duration::ZERO).unwrap().is_none());
    }
}
