//! Session Authority handlers
//!
//! 处理函数只做提取与转换，业务规则都在 [`AuthService`](crate::service::AuthService)。

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;
use shared::models::{
    ActivateQuery, ForgotPasswordRequest, LoginRequest, LoginResponse, RegisterRequest,
    ResetPasswordRequest, TokenResponse, UserInfo, UserListQuery, UserListResponse, UserUpdate,
};
use shared::session::Claims;
use shared::{ApiResponse, AppResult};

use super::Bearer;
use crate::state::ServerState;

pub async fn register(
    State(state): State<ServerState>,
    bearer: Bearer,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<ApiResponse<UserInfo>>> {
    let user = state.auth.register(req, bearer.as_deref()).await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn login(
    State(state): State<ServerState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let (user, token) = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(ApiResponse::success(LoginResponse { user, token })))
}

pub async fn activate(
    State(state): State<ServerState>,
    Query(query): Query<ActivateQuery>,
) -> AppResult<Json<ApiResponse<UserInfo>>> {
    let user = state.auth.activate(&query.token).await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn forgot_password(
    State(state): State<ServerState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.forgot_password(&req.email).await?;
    Ok(Json(ApiResponse::ok()))
}

pub async fn reset_password(
    State(state): State<ServerState>,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.reset_password(&req.token, &req.new_password).await?;
    Ok(Json(ApiResponse::ok()))
}

pub async fn refresh_token(
    State(state): State<ServerState>,
    bearer: Bearer,
) -> AppResult<Json<ApiResponse<TokenResponse>>> {
    let token = state.auth.refresh_token(bearer.required()?).await?;
    Ok(Json(ApiResponse::success(TokenResponse { token })))
}

pub async fn me(
    State(state): State<ServerState>,
    bearer: Bearer,
) -> AppResult<Json<ApiResponse<UserInfo>>> {
    let user = state.auth.me(bearer.required()?).await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn logout(
    State(state): State<ServerState>,
    bearer: Bearer,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.logout(bearer.required()?).await?;
    Ok(Json(ApiResponse::ok()))
}

/// ValidateToken RPC: 只校验签名、过期与注销，不读取存储
pub async fn validate(
    State(state): State<ServerState>,
    bearer: Bearer,
) -> AppResult<Json<ApiResponse<Claims>>> {
    let claims = state.auth.validate_token(bearer.required()?).await?;
    Ok(Json(ApiResponse::success(claims)))
}

// ========== Admin ==========

pub async fn list_users(
    State(state): State<ServerState>,
    bearer: Bearer,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<ApiResponse<UserListResponse>>> {
    let page = state.auth.list_users(bearer.as_deref(), query).await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn get_user(
    State(state): State<ServerState>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<UserInfo>>> {
    let user = state.auth.get_user(bearer.as_deref(), &id).await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn update_user(
    State(state): State<ServerState>,
    bearer: Bearer,
    Path(id): Path<String>,
    Json(update): Json<UserUpdate>,
) -> AppResult<Json<ApiResponse<UserInfo>>> {
    let user = state.auth.update_user(bearer.as_deref(), &id, update).await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn delete_user(
    State(state): State<ServerState>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.auth.delete_user(bearer.as_deref(), &id).await?;
    Ok(Json(ApiResponse::ok()))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// 存储不可读时为空
    revoked_tokens: Option<u64>,
}

pub async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    let revoked_tokens = match state.auth.revocations().len().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed to read revocations");
            None
        }
    };
    Json(HealthResponse {
        status: if revoked_tokens.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        revoked_tokens,
    })
}
