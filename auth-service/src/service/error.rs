use shared::error::{AppError, ErrorCode};
use shared::session::TokenError;
use thiserror::Error;

use crate::storage::StorageError;

/// 登录失败的内部原因，只写入安全日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    UnknownEmail,
    Inactive,
    WrongPassword,
}

impl LoginFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginFailure::UnknownEmail => "unknown_email",
            LoginFailure::Inactive => "inactive",
            LoginFailure::WrongPassword => "wrong_password",
        }
    }
}

/// Session Authority errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Email already registered")]
    EmailTaken,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Login failed: {}", .0.as_str())]
    LoginFailed(LoginFailure),

    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token is invalid")]
    TokenInvalid,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Activation token is invalid or expired")]
    ActivationTokenInvalid,

    #[error("Reset token is invalid or expired")]
    ResetTokenInvalid,

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EmailTaken => AuthError::EmailTaken,
            StorageError::UserNotFound(id) => AuthError::UserNotFound(id),
            other => AuthError::Storage(other),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Invalid(_) => AuthError::TokenInvalid,
            TokenError::Signing(msg) | TokenError::Config(msg) => AuthError::Internal(msg),
        }
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::Internal(format!("password hashing failed: {}", err))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(msg) => AppError::validation(msg),
            AuthError::EmailTaken => AppError::new(ErrorCode::EmailExists),
            AuthError::UserNotFound(id) => {
                AppError::new(ErrorCode::UserNotFound).with_detail("user_id", id)
            }
            // 三种登录失败对外完全一致
            AuthError::LoginFailed(_) => AppError::invalid_credentials(),
            AuthError::NotAuthenticated => AppError::unauthorized(),
            AuthError::TokenExpired => AppError::token_expired(),
            AuthError::TokenInvalid => AppError::new(ErrorCode::TokenInvalid),
            AuthError::PermissionDenied(_) => AppError::new(ErrorCode::PermissionDenied),
            AuthError::ActivationTokenInvalid => AppError::new(ErrorCode::ActivationTokenInvalid),
            AuthError::ResetTokenInvalid => AppError::new(ErrorCode::ResetTokenInvalid),
            AuthError::Storage(e) => {
                tracing::error!(error = %e, "Credential store failure");
                AppError::new(ErrorCode::DatabaseError)
            }
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "Session authority internal error");
                AppError::new(ErrorCode::InternalError)
            }
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
