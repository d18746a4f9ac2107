use std::time::Duration;

/// Gateway 配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | HTTP_PORT | 8080 | 对外 HTTP 端口 |
/// | AUTH_SERVICE_URL | http://127.0.0.1:3001 | Session Authority |
/// | ORDER_SERVICE_URL | http://127.0.0.1:3002 | Order Lifecycle Manager |
/// | PRODUCT_SERVICE_URL | http://127.0.0.1:3003 | 商品目录 (透传) |
/// | DOWNSTREAM_TIMEOUT_MS | 5000 | 每次下游调用的截止时间 |
/// | READ_RETRY_ATTEMPTS | 3 | 只读调用在连接失败时的重试次数 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 日志 |
/// | LOG_DIR | (无) | 文件日志目录 |
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub auth_service_url: String,
    pub order_service_url: String,
    pub product_service_url: String,
    pub downstream_timeout_ms: u64,
    pub read_retry_attempts: u32,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.http_port),
            auth_service_url: std::env::var("AUTH_SERVICE_URL")
                .unwrap_or(defaults.auth_service_url),
            order_service_url: std::env::var("ORDER_SERVICE_URL")
                .unwrap_or(defaults.order_service_url),
            product_service_url: std::env::var("PRODUCT_SERVICE_URL")
                .unwrap_or(defaults.product_service_url),
            downstream_timeout_ms: std::env::var("DOWNSTREAM_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.downstream_timeout_ms),
            read_retry_attempts: std::env::var("READ_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.read_retry_attempts),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_JSON")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_json),
            log_dir: std::env::var("LOG_DIR").ok(),
        }
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            auth_service_url: "http://127.0.0.1:3001".to_string(),
            order_service_url: "http://127.0.0.1:3002".to_string(),
            product_service_url: "http://127.0.0.1:3003".to_string(),
            downstream_timeout_ms: 5000,
            read_retry_attempts: 3,
            log_level: "info".to_string(),
            log_json: false,
            log_dir: None,
        }
    }
}
