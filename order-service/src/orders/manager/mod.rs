//! OrdersManager - 订单生命周期
//!
//! # Command Flow
//!
//! ```text
//! create / approve / cancel
//!     ├─ 1. 校验输入 (条目、金额)
//!     ├─ 2. 写事务: CAS 状态 + outbox 记录
//!     ├─ 3. 提交
//!     ├─ 4. 立即投递一次事件 (失败时记录退避，交给 OutboxRelay)
//!     └─ 5. 返回订单
//! ```
//!
//! 调用方身份校验不在这里，见 [`crate::auth`]。

mod error;
pub use error::*;

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use shared::models::{CreateOrderRequest, Order, OrderFilter, OrderStatus, OrderTransition};

use super::money::settle_total;
use super::outbox::{RetryPolicy, deliver};
use super::storage::{OrderStorage, OutboxEntry};
use crate::message::EventPublisher;

pub struct OrdersManager {
    storage: OrderStorage,
    publisher: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OrdersManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrdersManager")
            .field("storage", &"<OrderStorage>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl OrdersManager {
    pub fn new(storage: OrderStorage, publisher: Arc<dyn EventPublisher>, retry: RetryPolicy) -> Self {
        Self {
            storage,
            publisher,
            retry,
        }
    }

    pub fn storage(&self) -> &OrderStorage {
        &self.storage
    }

    pub async fn create_order(&self, req: CreateOrderRequest) -> ManagerResult<Order> {
        if req.user_id.trim().is_empty() {
            return Err(ManagerError::Validation("user_id must not be empty".into()));
        }
        let total = settle_total(&req.items, req.total)?;

        let now = shared::util::now_millis();
        let order = Order {
            id: shared::util::new_id(),
            user_id: req.user_id,
            items: req.items,
            total,
            address: req.address,
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
        };

        let entry = self.storage.insert_order(&order)?;
        tracing::info!(order_id = %order.id, user_id = %order.user_id, total = order.total, "Order created");

        self.dispatch(&entry).await;
        Ok(order)
    }

    pub fn get_order(&self, order_id: &str) -> ManagerResult<Order> {
        self.storage
            .get_order(order_id)?
            .ok_or_else(|| ManagerError::OrderNotFound(order_id.to_string()))
    }

    /// Finite, non-restartable stream of orders
    ///
    /// 订单在消费时逐条读取；不保证是一致性快照。
    pub fn list_orders(&self, filter: OrderFilter) -> BoxStream<'static, ManagerResult<Order>> {
        let ids = match self.storage.list_order_ids(filter.user_id.as_deref()) {
            Ok(ids) => ids,
            Err(e) => return stream::once(async move { Err(ManagerError::from(e)) }).boxed(),
        };

        let storage = self.storage.clone();
        stream::iter(ids)
            .filter_map(move |id| {
                let result = match storage.get_order(&id) {
                    Ok(Some(order)) => match &filter.user_id {
                        Some(user_id) if &order.user_id != user_id => None,
                        _ => Some(Ok(order)),
                    },
                    Ok(None) => None,
                    Err(e) => Some(Err(ManagerError::from(e))),
                };
                async move { result }
            })
            .boxed()
    }

    pub async fn cancel_order(&self, order_id: &str) -> ManagerResult<Order> {
        self.apply(order_id, OrderTransition::Cancel).await
    }

    pub async fn approve_order(&self, order_id: &str) -> ManagerResult<Order> {
        self.apply(order_id, OrderTransition::Approve).await
    }

    async fn apply(&self, order_id: &str, transition: OrderTransition) -> ManagerResult<Order> {
        let (order, entry) = self.storage.transition(order_id, transition).map_err(|e| {
            let err = ManagerError::from(e);
            if let ManagerError::InvalidState { current, .. } = &err {
                tracing::info!(order_id = %order_id, status = %current, transition = %transition, "Transition rejected");
            }
            err
        })?;

        tracing::info!(order_id = %order.id, status = %order.status, "Order {}", transition);

        if let Some(entry) = entry {
            self.dispatch(&entry).await;
        }
        Ok(order)
    }

    /// 提交后立即投递；失败不影响已经持久化的状态变更
    async fn dispatch(&self, entry: &OutboxEntry) {
        deliver(&self.storage, self.publisher.as_ref(), self.retry, entry).await;
    }
}

#[cfg(test)]
mod tests;
