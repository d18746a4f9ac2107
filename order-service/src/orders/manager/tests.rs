use std::time::Duration;

use futures::StreamExt;
use shared::models::{DomainEventType, OrderItem, TOPIC_ORDER_APPROVED, TOPIC_ORDER_CREATED};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::message::{IdempotentSubscriber, MessageBus};
use crate::orders::OutboxRelay;

fn manager_with_bus() -> (Arc<OrdersManager>, MessageBus) {
    let bus = MessageBus::new();
    let manager = OrdersManager::new(
        OrderStorage::open_in_memory().unwrap(),
        Arc::new(bus.clone()),
        RetryPolicy::default(),
    );
    (Arc::new(manager), bus)
}

fn request(user_id: &str) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id: user_id.to_string(),
        items: vec![OrderItem::new("p1", 2), OrderItem::new("p2", 1)],
        total: 100.0,
        address: "Main St 1".to_string(),
    }
}

#[tokio::test]
async fn test_create_publishes_order_created() {
    let (manager, bus) = manager_with_bus();
    let mut sub = IdempotentSubscriber::new(bus.register([TOPIC_ORDER_CREATED]));
    let consumer = tokio::spawn(async move { sub.next().await });

    let order = manager.create_order(request("u-1")).await.unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(order.total, 100.0);

    let event = consumer.await.unwrap().unwrap();
    assert_eq!(event.event_type, DomainEventType::OrderCreated);
    assert_eq!(event.order_id, order.id);
    // 已确认，outbox 为空
    assert_eq!(manager.storage().pending_count().unwrap(), 0);
}

#[tokio::test]
async fn test_observer_alone_does_not_drain_outbox() {
    let (manager, bus) = manager_with_bus();
    let mut audit = IdempotentSubscriber::observe(bus.subscribe(), &[]);

    let order = manager.create_order(request("u-1")).await.unwrap();

    assert_eq!(audit.next().await.unwrap().order_id, order.id);
    assert_eq!(manager.storage().pending_count().unwrap(), 1);
}

#[tokio::test]
async fn test_late_subscriber_receives_backlog() {
    let bus = MessageBus::new();
    let storage = OrderStorage::open_in_memory().unwrap();
    let manager = OrdersManager::new(storage.clone(), Arc::new(bus.clone()), RetryPolicy::default());
    let _audit = bus.subscribe();

    // 没有订阅方时创建
    let order = manager.create_order(request("u-1")).await.unwrap();
    assert_eq!(storage.pending_count().unwrap(), 1);

    let shutdown = CancellationToken::new();
    let relay = OutboxRelay::new(
        storage.clone(),
        Arc::new(bus.clone()),
        RetryPolicy::default(),
        Duration::from_secs(3600),
    )
    .with_wakeup(bus.subscriber_joined());
    tokio::spawn(relay.run(shutdown.clone()));

    // 订阅方稍后才连接
    let mut sub = IdempotentSubscriber::new(bus.register([TOPIC_ORDER_CREATED]));
    let event = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, DomainEventType::OrderCreated);
    assert_eq!(event.order_id, order.id);

    while storage.pending_count().unwrap() != 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
}

#[tokio::test]
async fn test_create_without_subscribers_keeps_outbox_entry() {
    let (manager, _bus) = manager_with_bus();
    let order = manager.create_order(request("u-1")).await.unwrap();

    // 订单已持久化，事件等待重投
    assert_eq!(manager.get_order(&order.id).unwrap().id, order.id);
    let pending = manager.storage().pending_events().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 1);
}

#[tokio::test]
async fn test_create_rejects_empty_items() {
    let (manager, _bus) = manager_with_bus();
    let req = CreateOrderRequest {
        items: vec![],
        ..request("u-1")
    };
    assert!(matches!(manager.create_order(req).await, Err(ManagerError::EmptyOrder)));
    assert_eq!(manager.storage().order_count().unwrap(), 0);
}

#[tokio::test]
async fn test_approve_twice_is_invalid_state() {
    let (manager, _bus) = manager_with_bus();
    let order = manager.create_order(request("u-1")).await.unwrap();

    let approved = manager.approve_order(&order.id).await.unwrap();
    assert_eq!(approved.status, OrderStatus::Approved);

    let err = manager.approve_order(&order.id).await.unwrap_err();
    assert!(matches!(err, ManagerError::InvalidState { current: OrderStatus::Approved, .. }));
}

#[tokio::test]
async fn test_cancel_then_approve_is_invalid_state() {
    let (manager, _bus) = manager_with_bus();
    let order = manager.create_order(request("u-1")).await.unwrap();

    manager.cancel_order(&order.id).await.unwrap();
    assert!(matches!(
        manager.approve_order(&order.id).await,
        Err(ManagerError::InvalidState { .. })
    ));
    assert!(matches!(
        manager.cancel_order(&order.id).await,
        Err(ManagerError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_approved_order_can_be_cancelled() {
    let (manager, _bus) = manager_with_bus();
    let order = manager.create_order(request("u-1")).await.unwrap();
    manager.approve_order(&order.id).await.unwrap();

    let cancelled = manager.cancel_order(&order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_unknown_order() {
    let (manager, _bus) = manager_with_bus();
    assert!(matches!(manager.get_order("nope"), Err(ManagerError::OrderNotFound(_))));
    assert!(matches!(
        manager.approve_order("nope").await,
        Err(ManagerError::OrderNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_exactly_one_wins() {
    let (manager, _bus) = manager_with_bus();
    let order = manager.create_order(request("u-1")).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let id = order.id.clone();
            tokio::spawn(async move { manager.approve_order(&id).await })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(matches!(e, ManagerError::InvalidState { .. })),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(manager.get_order(&order.id).unwrap().status, OrderStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approve_and_cancel() {
    for _ in 0..20 {
        let (manager, _bus) = manager_with_bus();
        let order = manager.create_order(request("u-1")).await.unwrap();

        let (m1, m2) = (manager.clone(), manager.clone());
        let (id1, id2) = (order.id.clone(), order.id.clone());
        let approve = tokio::spawn(async move { m1.approve_order(&id1).await });
        let cancel = tokio::spawn(async move { m2.cancel_order(&id2).await });
        let approve = approve.await.unwrap();
        let cancel = cancel.await.unwrap();

        // cancel 总能成功 (Created 与 Approved 都可取消)；
        // approve 只有先于 cancel 提交时成功
        let cancelled = cancel.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        match approve {
            Ok(approved) => assert_eq!(approved.status, OrderStatus::Approved),
            Err(e) => assert!(matches!(
                e,
                ManagerError::InvalidState { current: OrderStatus::Cancelled, .. }
            )),
        }
        assert_eq!(manager.get_order(&order.id).unwrap().status, OrderStatus::Cancelled);
    }
}

#[tokio::test]
async fn test_list_filters_by_user() {
    let (manager, _bus) = manager_with_bus();
    let a = manager.create_order(request("u-1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    manager.create_order(request("u-2")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let b = manager.create_order(request("u-1")).await.unwrap();

    let orders: Vec<Order> = manager
        .list_orders(OrderFilter {
            user_id: Some("u-1".into()),
        })
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(orders.iter().map(|o| o.id.clone()).collect::<Vec<_>>(), vec![a.id, b.id]);

    let all: Vec<_> = manager.list_orders(OrderFilter::default()).collect().await;
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_approval_event_matches_order() {
    let (manager, bus) = manager_with_bus();
    let mut sub = IdempotentSubscriber::new(bus.register([TOPIC_ORDER_APPROVED]));
    let consumer = tokio::spawn(async move { sub.next().await });

    let order = manager.create_order(request("u-1")).await.unwrap();
    manager.approve_order(&order.id).await.unwrap();

    let event = consumer.await.unwrap().unwrap();
    assert_eq!(event.order_id, order.id);
    assert_eq!(event.total, 100.0);
    assert_eq!(event.status, OrderStatus::Approved);
}
