use std::sync::Arc;
use std::time::Duration;

use shared::session::SessionTokens;

use crate::auth::{Authorizer, CallerDirectory, HttpCallerDirectory};
use crate::config::Config;
use crate::message::{MessageBus, TransportConfig};
use crate::orders::{OrderStorage, OrdersManager, OutboxRelay, RetryPolicy};

/// 服务器状态 - 持有所有服务的共享引用
///
/// Clone 成本低 (全部是 Arc / 句柄)，直接作为 axum state。
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub orders: Arc<OrdersManager>,
    pub bus: MessageBus,
    pub authorizer: Authorizer,
}

impl ServerState {
    /// 打开订单存储、创建总线并连接 Session Authority
    pub fn initialize(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let storage = OrderStorage::open(config.database_path())?;
        let bus = MessageBus::from_config(TransportConfig {
            tcp_listen_addr: config.bus_tcp_addr.clone(),
            ack_timeout: config.bus_ack_timeout(),
            ..TransportConfig::default()
        });
        let directory = HttpCallerDirectory::new(&config.auth_service_url, config.auth_timeout())?;
        Ok(Self::with_parts(config, storage, bus, Arc::new(directory)))
    }

    pub fn with_parts(
        config: Config,
        storage: OrderStorage,
        bus: MessageBus,
        directory: Arc<dyn CallerDirectory>,
    ) -> Self {
        let retry = retry_policy(&config);
        let orders = OrdersManager::new(storage, Arc::new(bus.clone()), retry);
        let authorizer = Authorizer::new(SessionTokens::new(config.jwt_secret.as_bytes()), directory);

        Self {
            config: Arc::new(config),
            orders: Arc::new(orders),
            bus,
            authorizer,
        }
    }

    /// Background relay over the same store and bus
    ///
    /// 新的 topic 订阅方注册时立即重放积压事件。
    pub fn outbox_relay(&self) -> OutboxRelay {
        OutboxRelay::new(
            self.orders.storage().clone(),
            Arc::new(self.bus.clone()),
            retry_policy(&self.config),
            self.config.outbox_scan_interval(),
        )
        .with_wakeup(self.bus.subscriber_joined())
    }
}

fn retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy {
        base: Duration::from_millis(config.outbox_retry_base_ms),
        max: Duration::from_secs(config.outbox_retry_max_secs),
    }
}
