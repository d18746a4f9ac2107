//! Axum extractors shared by every HTTP surface

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::session::extract_bearer;

/// Bearer credential from the call metadata, if any
///
/// 这里只负责提取；是否需要、是否有效由具体操作决定。
/// 头存在但格式不对时直接拒绝。
#[derive(Debug, Clone, Default)]
pub struct Bearer(pub Option<String>);

impl Bearer {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// 必须携带令牌
    pub fn required(&self) -> Result<&str, AppError> {
        self.as_deref().ok_or_else(AppError::unauthorized)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Bearer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(http::header::AUTHORIZATION) else {
            return Ok(Bearer(None));
        };

        let token = value
            .to_str()
            .ok()
            .and_then(extract_bearer)
            .ok_or_else(|| AppError::invalid_token("Invalid authorization header"))?;

        Ok(Bearer(Some(token.to_string())))
    }
}
