//! Gateway handlers
//!
//! 每个处理函数把入站请求映射为一次下游调用；请求体原样转发。

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use http::{Method, Uri};
use serde::Serialize;
use serde_json::Value;
use shared::models::Order;
use shared::{ApiResponse, AppError, AppResult};

use super::CallContext;
use crate::client::{Call, Downstream};
use crate::state::GatewayState;

type Reply = AppResult<Json<ApiResponse<Value>>>;

async fn relay(target: &Downstream, call: Call) -> Reply {
    let data = target.execute(call).await?;
    Ok(Json(envelope(data)))
}

fn envelope(data: Option<Value>) -> ApiResponse<Value> {
    match data {
        Some(value) => ApiResponse::success(value),
        None => ApiResponse {
            code: Some(0),
            message: "OK".to_string(),
            data: None,
            details: None,
        },
    }
}

// ========== Session Authority ==========

pub async fn register(State(state): State<GatewayState>, ctx: CallContext, body: Bytes) -> Reply {
    relay(&state.auth, ctx.call(Method::POST, "/rpc/auth/register").body(body)).await
}

pub async fn login(State(state): State<GatewayState>, ctx: CallContext, body: Bytes) -> Reply {
    relay(&state.auth, ctx.call(Method::POST, "/rpc/auth/login").body(body)).await
}

pub async fn activate(
    State(state): State<GatewayState>,
    ctx: CallContext,
    RawQuery(query): RawQuery,
) -> Reply {
    let call = ctx
        .call(Method::GET, "/rpc/auth/activate")
        .raw_query(query.as_deref());
    relay(&state.auth, call).await
}

pub async fn forgot_password(State(state): State<GatewayState>, ctx: CallContext, body: Bytes) -> Reply {
    relay(&state.auth, ctx.call(Method::POST, "/rpc/auth/forgot-password").body(body)).await
}

pub async fn reset_password(State(state): State<GatewayState>, ctx: CallContext, body: Bytes) -> Reply {
    relay(&state.auth, ctx.call(Method::POST, "/rpc/auth/reset-password").body(body)).await
}

pub async fn refresh_token(State(state): State<GatewayState>, ctx: CallContext) -> Reply {
    relay(&state.auth, ctx.call(Method::POST, "/rpc/auth/refresh-token")).await
}

pub async fn me(State(state): State<GatewayState>, ctx: CallContext) -> Reply {
    relay(&state.auth, ctx.call(Method::GET, "/rpc/auth/me")).await
}

pub async fn logout(State(state): State<GatewayState>, ctx: CallContext) -> Reply {
    relay(&state.auth, ctx.call(Method::POST, "/rpc/auth/logout")).await
}

pub async fn list_users(
    State(state): State<GatewayState>,
    ctx: CallContext,
    RawQuery(query): RawQuery,
) -> Reply {
    let call = ctx
        .call(Method::GET, "/rpc/auth/users")
        .raw_query(query.as_deref());
    relay(&state.auth, call).await
}

pub async fn get_user(
    State(state): State<GatewayState>,
    ctx: CallContext,
    Path(id): Path<String>,
) -> Reply {
    relay(&state.auth, ctx.call(Method::GET, user_path(&id)?)).await
}

pub async fn update_user(
    State(state): State<GatewayState>,
    ctx: CallContext,
    Path(id): Path<String>,
    body: Bytes,
) -> Reply {
    relay(&state.auth, ctx.call(Method::PUT, user_path(&id)?).body(body)).await
}

pub async fn delete_user(
    State(state): State<GatewayState>,
    ctx: CallContext,
    Path(id): Path<String>,
) -> Reply {
    relay(&state.auth, ctx.call(Method::DELETE, user_path(&id)?)).await
}

fn user_path(id: &str) -> AppResult<String> {
    Ok(format!("/rpc/auth/users/{}", encode_segment(id)?))
}

// ========== Catalog ==========

/// 目录服务路径与网关一致，方法、查询串、请求体全部透传
pub async fn products(
    State(state): State<GatewayState>,
    ctx: CallContext,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Reply {
    let call = ctx
        .call(method, uri.path())
        .raw_query(uri.query())
        .body(body);
    relay(&state.catalog, call).await
}

// ========== Orders ==========

pub async fn create_order(State(state): State<GatewayState>, ctx: CallContext, body: Bytes) -> Reply {
    relay(&state.orders, ctx.call(Method::POST, "/rpc/orders").body(body)).await
}

pub async fn get_order(
    State(state): State<GatewayState>,
    ctx: CallContext,
    Path(id): Path<String>,
) -> Reply {
    let path = format!("/rpc/orders/{}", encode_segment(&id)?);
    relay(&state.orders, ctx.call(Method::GET, path)).await
}

/// 下游是流式列表；这里消费到结束，整体返回或返回第一个错误
pub async fn list_user_orders(
    State(state): State<GatewayState>,
    ctx: CallContext,
    Path(user_id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<Order>>>> {
    let call = ctx.call(Method::GET, "/rpc/orders").param("user_id", user_id);
    let orders = state.orders.collect_orders(call).await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn cancel_order(
    State(state): State<GatewayState>,
    ctx: CallContext,
    Path(id): Path<String>,
) -> Reply {
    let path = format!("/rpc/orders/{}/cancel", encode_segment(&id)?);
    relay(&state.orders, ctx.call(Method::POST, path)).await
}

pub async fn approve_order(
    State(state): State<GatewayState>,
    ctx: CallContext,
    Path(id): Path<String>,
) -> Reply {
    let path = format!("/rpc/orders/{}/approve", encode_segment(&id)?);
    relay(&state.orders, ctx.call(Method::POST, path)).await
}

/// Path parameters are decoded by the router; re-encode before forwarding
fn encode_segment(segment: &str) -> AppResult<String> {
    // "." 与 ".." 会被 URL 解析折叠成上级路径
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(AppError::invalid_request("Invalid path parameter"));
    }
    Ok(urlencoding::encode(segment).into_owned())
}

// ========== Health ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub downstreams: Vec<&'static str>,
}

pub async fn health(State(state): State<GatewayState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "ok",
        downstreams: vec![state.auth.name(), state.orders.name(), state.catalog.name()],
    }))
}
