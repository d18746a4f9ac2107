use std::sync::Arc;
use std::time::Duration;

use crate::client::{CallPolicy, Downstream};
use crate::config::Config;

/// Gateway state - one client per downstream service
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub auth: Downstream,
    pub orders: Downstream,
    pub catalog: Downstream,
}

impl GatewayState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        // 超时由每次调用的截止时间控制，这里只限制建连
        let http = reqwest::Client::builder()
            .connect_timeout(config.downstream_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let policy = CallPolicy {
            timeout: config.downstream_timeout(),
            read_retries: config.read_retry_attempts,
            ..CallPolicy::default()
        };

        Ok(Self {
            auth: Downstream::new("auth", http.clone(), &config.auth_service_url, policy),
            orders: Downstream::new("orders", http.clone(), &config.order_service_url, policy),
            catalog: Downstream::new("catalog", http, &config.product_service_url, policy),
            config: Arc::new(config),
        })
    }
}
