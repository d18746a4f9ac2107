//! Caller authorization for order operations
//!
//! 令牌先在本地验证签名与有效期，再向 Session Authority 实时确认账户：
//! 已注销的令牌、被删除或停用的账户立即失效，角色以实时账户为准。
//! Session Authority 不可达时一律拒绝 (503)。
//!
//! | 操作 | 要求 |
//! |------|------|
//! | create | 本人 (user_id == caller) 或管理员 |
//! | get / cancel | 订单所有者或管理员 |
//! | list | 本人的 user_id，否则管理员 |
//! | approve | 管理员 |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::{Role, UserInfo};
use shared::session::SessionTokens;
use shared::{ApiResponse, security_log};

/// Authenticated caller of one request
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    /// 实时账户的角色，不是令牌里的
    pub role: Role,
}

/// Live view of the caller's account
#[async_trait]
pub trait CallerDirectory: Send + Sync {
    /// `Ok(None)` 表示令牌已注销，或账户不存在、未激活
    async fn resolve(&self, token: &str) -> AppResult<Option<UserInfo>>;
}

/// Asks the session authority's `GetMe` with the caller's own bearer
pub struct HttpCallerDirectory {
    client: reqwest::Client,
    me_url: String,
}

impl HttpCallerDirectory {
    pub fn new(auth_service_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            me_url: format!("{}/rpc/auth/me", auth_service_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl CallerDirectory for HttpCallerDirectory {
    async fn resolve(&self, token: &str) -> AppResult<Option<UserInfo>> {
        let response = self
            .client
            .get(&self.me_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Session authority unreachable");
                AppError::unavailable()
            })?;

        let body: ApiResponse<UserInfo> = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Malformed session authority response");
            AppError::unavailable()
        })?;

        match body.into_result() {
            Ok(Some(user)) if user.is_active => Ok(Some(user)),
            Ok(_) => Ok(None),
            // 令牌被注销 / 用户被删除
            Err(e) if e.http_status().is_client_error() => Ok(None),
            Err(e) => {
                tracing::error!(code = ?e.code, "Session authority failed live account check");
                Err(AppError::unavailable())
            }
        }
    }
}

#[derive(Clone)]
pub struct Authorizer {
    tokens: SessionTokens,
    directory: Arc<dyn CallerDirectory>,
}

impl Authorizer {
    pub fn new(tokens: SessionTokens, directory: Arc<dyn CallerDirectory>) -> Self {
        Self { tokens, directory }
    }

    /// 本地验证令牌，再实时确认账户仍然有效
    pub async fn authenticate(&self, bearer: Option<&str>) -> AppResult<Caller> {
        let Some(token) = bearer else {
            return Err(AppError::unauthorized());
        };

        let claims = self.tokens.validate(token).map_err(|e| {
            security_log!(WARN, "auth_failed", error = %e);
            AppError::from(e)
        })?;

        let live = self.directory.resolve(token).await?;
        let Some(user) = live.filter(|user| user.id == claims.user_id) else {
            security_log!(WARN, "auth_failed", user_id = %claims.user_id, reason = "account_not_live");
            return Err(AppError::new(ErrorCode::TokenInvalid));
        };

        Ok(Caller {
            user_id: user.id,
            role: user.role,
        })
    }

    pub fn require_admin(&self, caller: &Caller, action: &str) -> AppResult<()> {
        if !caller.role.is_admin() {
            security_log!(WARN, "permission_denied", user_id = %caller.user_id, action = action);
            return Err(AppError::new(ErrorCode::PermissionDenied));
        }

        security_log!(INFO, "admin_action", admin_id = %caller.user_id, action = action);
        Ok(())
    }

    /// 本人直接放行，其余情况按管理员处理
    pub fn authorize_owner(&self, caller: &Caller, owner_id: &str, action: &str) -> AppResult<()> {
        if caller.user_id == owner_id {
            return Ok(());
        }
        self.require_admin(caller, action)
    }
}
