//! Order lifecycle
//!
//! - [`storage`] - redb 订单表、按用户索引与事件 outbox
//! - [`money`] - 金额校验与重算
//! - [`manager`] - 状态机命令 (create / approve / cancel)
//! - [`outbox`] - 未确认事件的后台重投

pub mod manager;
pub mod money;
pub mod outbox;
pub mod storage;

pub use manager::{ManagerError, ManagerResult, OrdersManager};
pub use outbox::{OutboxRelay, RetryPolicy};
pub use storage::{OrderStorage, OutboxEntry, StorageError};
