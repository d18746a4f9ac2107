//! Session token codec
//!
//! 会话令牌 = HS256 签名的 `{user_id, role, exp, iat, iat_ms, jti}`，有效期固定 24 小时。
//! 令牌验证是纯计算，不做任何 I/O；Session Authority 签发，
//! 需要身份的服务各自验证。网关从不解析令牌。

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{AppError, ErrorCode};
use crate::models::Role;

/// Fixed validity window of every session token
pub const TOKEN_VALIDITY_HOURS: i64 = 24;

/// Minimum signing key length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// Conventional header carrying the bearer credential
pub const AUTHORIZATION: &str = "authorization";

#[cfg(debug_assertions)]
const DEVELOPMENT_SECRET: &str = "development-only-session-key-replace-in-production!";

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub role: Role,
    /// 过期时间戳 (秒)
    pub exp: i64,
    /// 签发时间戳 (秒)
    pub iat: i64,
    /// 签发时间戳 (毫秒)，与密码修改时间比较
    #[serde(default)]
    pub iat_ms: i64,
    /// 令牌唯一 ID，同一秒内签发的两个令牌也互不相同
    #[serde(default)]
    pub jti: String,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AppError::token_expired(),
            TokenError::Invalid(_) => AppError::new(ErrorCode::TokenInvalid),
            TokenError::Signing(msg) => AppError::internal(msg),
            TokenError::Config(msg) => AppError::with_message(ErrorCode::ConfigError, msg),
        }
    }
}

/// 加载签名密钥
///
/// 生产环境必须设置 `JWT_SECRET` (至少 32 字节)。
/// 开发构建下缺失时使用固定的开发密钥，保证多个服务使用同一把钥匙。
pub fn load_secret_from_env() -> Result<String, TokenError> {
    match std::env::var("JWT_SECRET") {
        Ok(secret) => {
            if secret.len() < MIN_SECRET_LEN {
                return Err(TokenError::Config(format!(
                    "JWT_SECRET must be at least {} characters long",
                    MIN_SECRET_LEN
                )));
            }
            Ok(secret)
        }
        Err(_) => {
            #[cfg(debug_assertions)]
            {
                tracing::warn!("JWT_SECRET not set, using development signing key");
                Ok(DEVELOPMENT_SECRET.to_string())
            }
            #[cfg(not(debug_assertions))]
            {
                Err(TokenError::Config(
                    "JWT_SECRET environment variable must be set in production".to_string(),
                ))
            }
        }
    }
}

/// Signs and validates session tokens with one process-wide key
#[derive(Clone)]
pub struct SessionTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens").finish_non_exhaustive()
    }
}

impl SessionTokens {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Issue a token valid for exactly 24 hours from now
    pub fn issue(&self, user_id: &str, role: Role) -> Result<String, TokenError> {
        self.issue_at(user_id, role, Utc::now())
    }

    /// Issue a token as if it were `now`
    pub fn issue_at(
        &self,
        user_id: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            user_id: user_id.to_string(),
            role,
            exp: (now + Duration::hours(TOKEN_VALIDITY_HOURS)).timestamp(),
            iat: now.timestamp(),
            iat_ms: now.timestamp_millis(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// 验证签名与过期时间
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// 验证令牌在 `now` 时仍然有效；`exp == now` 视为已过期
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::Invalid("signature mismatch".into()),
                _ => TokenError::Invalid(e.to_string()),
            }
        })?;

        // jsonwebtoken 在 exp == now 时仍然放行
        if data.claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }
}

/// 从 Authorization 头提取 bearer 令牌
pub fn extract_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
