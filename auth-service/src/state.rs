use std::sync::Arc;

use shared::session::SessionTokens;

use crate::config::Config;
use crate::notifier::{LogNotifier, Notifier};
use crate::password::PasswordHasher;
use crate::service::{AuthPolicy, AuthService};
use crate::storage::{UserRepository, UserStorage};

/// 服务器状态 - 持有所有服务的共享引用
///
/// Clone 成本低 (全部是 Arc / 句柄)，直接作为 axum state。
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub auth: AuthService,
}

impl ServerState {
    /// 打开凭据存储并组装 Session Authority
    pub fn initialize(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let storage = UserStorage::open(config.database_path())?;
        Self::with_repository(config, Arc::new(storage), Arc::new(LogNotifier))
    }

    pub fn with_repository(
        config: Config,
        users: Arc<dyn UserRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let hasher = PasswordHasher::new(config.password_pepper.clone())
            .map_err(|e| anyhow::anyhow!("failed to initialize password hasher: {}", e))?;
        let tokens = SessionTokens::new(config.jwt_secret.as_bytes());
        let auth = AuthService::new(users, hasher, tokens, notifier, AuthPolicy::from_config(&config));

        Ok(Self {
            config: Arc::new(config),
            auth,
        })
    }
}
