//! Session Authority
//!
//! ```text
//!   register ──▶ hash(password ‖ pepper) ──▶ UserRepository
//!   login    ──▶ verify ──▶ SessionTokens::issue ──▶ token
//!   me / refresh / admin ──▶ validate ──▶ 重新读取用户记录 (live check)
//! ```
//!
//! 令牌中的角色只是签发时的快照；任何需要身份的操作都会重新读取用户记录，
//! 被删除、停用或降级的用户立即失去权限。

mod admin;
mod error;

pub use error::{AuthError, AuthResult, LoginFailure};

use std::sync::Arc;

use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use shared::models::{RegisterRequest, Role, UserInfo};
use shared::security_log;
use shared::session::{Claims, SessionTokens};
use validator::ValidateEmail;

use crate::config::Config;
use crate::notifier::Notifier;
use crate::password::{MIN_PASSWORD_LEN, PasswordHasher};
use crate::revocation::{RevocationList, token_digest};
use crate::storage::{OneTimeToken, OneTimeTokenKind, StorageError, UserPatch, UserRecord, UserRepository};

/// Registration / one-time token policy
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub require_activation: bool,
    pub activation_ttl: Duration,
    pub reset_ttl: Duration,
}

impl AuthPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            require_activation: config.require_activation,
            activation_ttl: Duration::hours(config.activation_ttl_hours),
            reset_ttl: Duration::minutes(config.reset_ttl_minutes),
        }
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            require_activation: false,
            activation_ttl: Duration::hours(48),
            reset_ttl: Duration::minutes(60),
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    hasher: PasswordHasher,
    tokens: SessionTokens,
    revoked: RevocationList,
    notifier: Arc<dyn Notifier>,
    policy: AuthPolicy,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: PasswordHasher,
        tokens: SessionTokens,
        notifier: Arc<dyn Notifier>,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            revoked: RevocationList::new(users.clone()),
            users,
            hasher,
            tokens,
            notifier,
            policy,
        }
    }

    pub fn revocations(&self) -> &RevocationList {
        &self.revoked
    }

    // ========== Registration ==========

    /// 注册新用户
    ///
    /// `caller_token` 仅用于判断是否允许指定 admin 角色；
    /// 没有在线管理员身份时一律创建 customer。
    pub async fn register(
        &self,
        req: RegisterRequest,
        caller_token: Option<&str>,
    ) -> AuthResult<UserInfo> {
        let name = req.name.trim().to_string();
        validate_name(&name)?;
        validate_email(&req.email)?;
        validate_password(&req.password)?;

        let role = self.resolve_requested_role(req.role.as_deref(), caller_token).await;

        let now = Utc::now();
        let record = UserRecord {
            id: shared::util::new_id(),
            name,
            email: req.email.trim().to_string(),
            password_hash: self.hasher.hash(&req.password)?,
            role,
            is_active: !self.policy.require_activation,
            created_at: now.timestamp_millis(),
            updated_at: now.timestamp_millis(),
            password_changed_at: now.timestamp_millis(),
        };

        self.users.create(&record).await?;

        if self.policy.require_activation {
            let token = self
                .store_one_time_token(&record.id, OneTimeTokenKind::Activation, self.policy.activation_ttl)
                .await?;
            self.notifier.send_activation(&record.email, &token).await;
        }

        tracing::info!(user_id = %record.id, role = %record.role, "User registered");
        Ok(record.info())
    }

    async fn resolve_requested_role(&self, requested: Option<&str>, caller_token: Option<&str>) -> Role {
        let wants_admin = requested
            .and_then(|r| r.parse::<Role>().ok())
            .is_some_and(|r| r.is_admin());
        if !wants_admin {
            return Role::Customer;
        }

        match self.admin_guard(caller_token, "register_admin").await {
            Ok(admin) => {
                security_log!(INFO, "admin_action", admin_id = %admin.id, action = "register_admin");
                Role::Admin
            }
            Err(_) => {
                security_log!(WARN, "role_escalation_denied", requested_role = "admin");
                Role::Customer
            }
        }
    }

    // ========== Login & tokens ==========

    /// 登录；三种失败原因只写入安全日志，对外统一为认证失败
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<(UserInfo, String)> {
        let user = match self.users.find_by_email(email).await? {
            Some(user) => user,
            None => {
                self.hasher.verify_dummy(password);
                return Err(self.login_failed(email, LoginFailure::UnknownEmail));
            }
        };

        let password_ok = self.hasher.verify(password, &user.password_hash)?;
        if !password_ok {
            return Err(self.login_failed(email, LoginFailure::WrongPassword));
        }
        if !user.is_active {
            return Err(self.login_failed(email, LoginFailure::Inactive));
        }

        let token = self.issue_token(&user.id, user.role)?;
        tracing::info!(user_id = %user.id, role = %user.role, "User logged in");
        Ok((user.info(), token))
    }

    fn login_failed(&self, email: &str, reason: LoginFailure) -> AuthError {
        security_log!(WARN, "login_failed", email = %email, reason = reason.as_str());
        AuthError::LoginFailed(reason)
    }

    pub fn issue_token(&self, user_id: &str, role: Role) -> AuthResult<String> {
        Ok(self.tokens.issue(user_id, role)?)
    }

    /// 验证签名、过期时间和注销状态 (不读取用户记录)
    pub async fn validate_token(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.tokens.validate(token)?;
        if self.revoked.is_revoked(token).await? {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }

    /// 验证令牌并重新读取用户；已删除、已停用或改过密码的令牌视为无效
    pub async fn current_user(&self, token: &str) -> AuthResult<(Claims, UserRecord)> {
        let claims = self.validate_token(token).await?;
        let user = match self.users.get(&claims.user_id).await? {
            Some(user) => user,
            None => {
                security_log!(WARN, "token_for_deleted_user", user_id = %claims.user_id);
                return Err(AuthError::TokenInvalid);
            }
        };
        if !user.is_active {
            return Err(AuthError::TokenInvalid);
        }
        // 同一毫秒内签发的令牌也视为重置前签发
        if claims.iat_ms <= user.password_changed_at {
            security_log!(WARN, "token_predates_password_change", user_id = %user.id);
            return Err(AuthError::TokenInvalid);
        }
        Ok((claims, user))
    }

    pub async fn me(&self, token: &str) -> AuthResult<UserInfo> {
        let (_, user) = self.current_user(token).await?;
        Ok(user.info())
    }

    /// 用当前角色签发新令牌并注销旧令牌
    pub async fn refresh_token(&self, token: &str) -> AuthResult<String> {
        let (claims, user) = self.current_user(token).await?;
        let fresh = self.issue_token(&user.id, user.role)?;
        self.revoked.revoke(token, claims.exp).await?;
        tracing::debug!(user_id = %user.id, "Session token refreshed");
        Ok(fresh)
    }

    pub async fn logout(&self, token: &str) -> AuthResult<()> {
        let claims = self.validate_token(token).await?;
        self.revoked.revoke(token, claims.exp).await?;
        tracing::info!(user_id = %claims.user_id, "User logged out");
        Ok(())
    }

    // ========== Activation & password reset ==========

    pub async fn activate(&self, token: &str) -> AuthResult<UserInfo> {
        let entry = self
            .redeem_one_time_token(token, OneTimeTokenKind::Activation)
            .await?
            .ok_or(AuthError::ActivationTokenInvalid)?;

        let activate = UserPatch {
            is_active: Some(true),
            ..UserPatch::default()
        };
        let user = self.users.patch(&entry.user_id, &activate).await.map_err(|e| match e {
            StorageError::UserNotFound(_) => AuthError::ActivationTokenInvalid,
            other => other.into(),
        })?;

        tracing::info!(user_id = %user.id, "User activated");
        Ok(user.info())
    }

    /// 无论邮箱是否存在，返回值都相同
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let Some(user) = self.users.find_by_email(email).await? else {
            security_log!(INFO, "password_reset_unknown_email", email = %email);
            return Ok(());
        };

        let token = self
            .store_one_time_token(&user.id, OneTimeTokenKind::PasswordReset, self.policy.reset_ttl)
            .await?;
        self.notifier.send_password_reset(&user.email, &token).await;
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        validate_password(new_password)?;

        let entry = self
            .redeem_one_time_token(token, OneTimeTokenKind::PasswordReset)
            .await?
            .ok_or(AuthError::ResetTokenInvalid)?;

        let reset = UserPatch {
            password_hash: Some(self.hasher.hash(new_password)?),
            password_changed_at: Some(shared::util::now_millis()),
            ..UserPatch::default()
        };
        let user = self.users.patch(&entry.user_id, &reset).await.map_err(|e| match e {
            StorageError::UserNotFound(_) => AuthError::ResetTokenInvalid,
            other => other.into(),
        })?;

        security_log!(INFO, "password_reset", user_id = %user.id);
        Ok(())
    }

    async fn store_one_time_token(
        &self,
        user_id: &str,
        kind: OneTimeTokenKind,
        ttl: Duration,
    ) -> AuthResult<String> {
        let token = random_token()?;
        let entry = OneTimeToken {
            user_id: user_id.to_string(),
            kind,
            expires_at: (Utc::now() + ttl).timestamp_millis(),
        };
        self.users.put_one_time_token(&token_digest(&token), &entry).await?;
        Ok(token)
    }

    /// 取出一次性令牌；类型不符时放回，过期时丢弃
    async fn redeem_one_time_token(
        &self,
        token: &str,
        kind: OneTimeTokenKind,
    ) -> AuthResult<Option<OneTimeToken>> {
        let digest = token_digest(token);
        let Some(entry) = self.users.take_one_time_token(&digest).await? else {
            return Ok(None);
        };
        if entry.kind != kind {
            self.users.put_one_time_token(&digest, &entry).await?;
            return Ok(None);
        }
        if entry.expires_at <= shared::util::now_millis() {
            return Ok(None);
        }
        Ok(Some(entry))
    }
}

// ========== Validation ==========

fn validate_name(name: &str) -> AuthResult<()> {
    if name.is_empty() {
        return Err(AuthError::Validation("name must not be empty".into()));
    }
    Ok(())
}

/// 结构校验：合法的本地部分 + 带字母顶级域的域名
pub(crate) fn validate_email(email: &str) -> AuthResult<()> {
    let email = email.trim();
    let has_tld = email
        .rsplit_once('@')
        .and_then(|(_, domain)| domain.rsplit_once('.'))
        .is_some_and(|(_, tld)| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));

    if !email.validate_email() || !has_tld {
        return Err(AuthError::Validation("invalid email format".into()));
    }
    Ok(())
}

fn validate_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn random_token() -> AuthResult<String> {
    let mut buf = [0u8; 32];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| AuthError::Internal("secure random generator failed".into()))?;
    Ok(hex::encode(buf))
}
