use std::path::PathBuf;
use std::time::Duration;

use shared::session::{TokenError, load_secret_from_env};

/// Order Lifecycle Manager 配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | HTTP_PORT | 3002 | HTTP RPC 端口 |
/// | BUS_TCP_ADDR | 0.0.0.0:4222 | 事件总线 TCP 监听地址 |
/// | BUS_ACK_TIMEOUT_MS | 2000 | 等待订阅方确认的时间 |
/// | DATA_DIR | ./data/orders | redb 数据目录 |
/// | JWT_SECRET | (必填) | 会话令牌签名密钥，与 auth-service 相同 |
/// | AUTH_SERVICE_URL | http://127.0.0.1:3001 | 实时管理员检查 |
/// | AUTH_TIMEOUT_MS | 2000 | 管理员检查超时 |
/// | OUTBOX_SCAN_INTERVAL_SECS | 5 | outbox 扫描间隔 |
/// | OUTBOX_RETRY_BASE_MS | 1000 | 重投退避起点 |
/// | OUTBOX_RETRY_MAX_SECS | 60 | 重投退避上限 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 日志 |
/// | LOG_DIR | (无) | 文件日志目录 |
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub bus_tcp_addr: String,
    pub bus_ack_timeout_ms: u64,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub auth_service_url: String,
    pub auth_timeout_ms: u64,
    pub outbox_scan_interval_secs: u64,
    pub outbox_retry_base_ms: u64,
    pub outbox_retry_max_secs: u64,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, TokenError> {
        let defaults = Self::default();
        Ok(Self {
            http_port: env_or("HTTP_PORT", defaults.http_port),
            bus_tcp_addr: std::env::var("BUS_TCP_ADDR").unwrap_or(defaults.bus_tcp_addr),
            bus_ack_timeout_ms: env_or("BUS_ACK_TIMEOUT_MS", defaults.bus_ack_timeout_ms),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            jwt_secret: load_secret_from_env()?,
            auth_service_url: std::env::var("AUTH_SERVICE_URL")
                .unwrap_or(defaults.auth_service_url),
            auth_timeout_ms: env_or("AUTH_TIMEOUT_MS", defaults.auth_timeout_ms),
            outbox_scan_interval_secs: env_or(
                "OUTBOX_SCAN_INTERVAL_SECS",
                defaults.outbox_scan_interval_secs,
            ),
            outbox_retry_base_ms: env_or("OUTBOX_RETRY_BASE_MS", defaults.outbox_retry_base_ms),
            outbox_retry_max_secs: env_or("OUTBOX_RETRY_MAX_SECS", defaults.outbox_retry_max_secs),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env_or("LOG_JSON", defaults.log_json),
            log_dir: std::env::var("LOG_DIR").ok(),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("orders.redb")
    }

    pub fn bus_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_ack_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn outbox_scan_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_scan_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3002,
            bus_tcp_addr: "0.0.0.0:4222".to_string(),
            bus_ack_timeout_ms: 2000,
            data_dir: PathBuf::from("./data/orders"),
            jwt_secret: String::new(),
            auth_service_url: "http://127.0.0.1:3001".to_string(),
            auth_timeout_ms: 2000,
            outbox_scan_interval_secs: 5,
            outbox_retry_base_ms: 1000,
            outbox_retry_max_secs: 60,
            log_level: "info".to_string(),
            log_json: false,
            log_dir: None,
        }
    }
}
