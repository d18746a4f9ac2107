use std::path::PathBuf;

use shared::session::{TokenError, load_secret_from_env};

/// Session Authority 配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | HTTP_PORT | 3001 | HTTP RPC 端口 |
/// | DATA_DIR | ./data/auth | redb 数据目录 |
/// | JWT_SECRET | (必填) | 会话令牌签名密钥，至少 32 字节 |
/// | PASSWORD_PEPPER | (空) | 密码哈希前拼接的服务端密钥 |
/// | REQUIRE_ACTIVATION | false | 注册后是否需要激活 |
/// | ACTIVATION_TTL_HOURS | 48 | 激活令牌有效期 |
/// | RESET_TTL_MINUTES | 60 | 重置密码令牌有效期 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 日志 |
/// | LOG_DIR | (无) | 文件日志目录 |
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub password_pepper: String,
    pub require_activation: bool,
    pub activation_ttl_hours: i64,
    pub reset_ttl_minutes: i64,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, TokenError> {
        let defaults = Self::default();
        Ok(Self {
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.http_port),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            jwt_secret: load_secret_from_env()?,
            password_pepper: std::env::var("PASSWORD_PEPPER").unwrap_or_default(),
            require_activation: std::env::var("REQUIRE_ACTIVATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.require_activation),
            activation_ttl_hours: std::env::var("ACTIVATION_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.activation_ttl_hours),
            reset_ttl_minutes: std::env::var("RESET_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reset_ttl_minutes),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_JSON")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_json),
            log_dir: std::env::var("LOG_DIR").ok(),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("users.redb")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3001,
            data_dir: PathBuf::from("./data/auth"),
            jwt_secret: String::new(),
            password_pepper: String::new(),
            require_activation: false,
            activation_ttl_hours: 48,
            reset_ttl_minutes: 60,
            log_level: "info".to_string(),
            log_json: false,
            log_dir: None,
        }
    }
}
