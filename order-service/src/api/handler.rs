//! Order handlers

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Serialize;
use shared::error::{AppError, ErrorCode};
use shared::extract::Bearer;
use shared::models::{CreateOrderRequest, Order, OrderFilter, OrderFrame};
use shared::{ApiResponse, AppResult, security_log};

use super::NDJSON;
use crate::auth::Caller;
use crate::orders::ManagerError;
use crate::state::ServerState;

pub async fn create_order(
    State(state): State<ServerState>,
    bearer: Bearer,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let caller = state.authorizer.authenticate(bearer.as_deref()).await?;
    state
        .authorizer
        .authorize_owner(&caller, &req.user_id, "create_order")?;

    let order = state.orders.create_order(req).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn get_order(
    State(state): State<ServerState>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let caller = state.authorizer.authenticate(bearer.as_deref()).await?;
    let order = owned_order(&state, &caller, &id, "get_order")?;
    Ok(Json(ApiResponse::success(order)))
}

/// 非管理员对 "不存在" 与 "不是你的" 得到同一个回答
fn owned_order(state: &ServerState, caller: &Caller, id: &str, action: &str) -> AppResult<Order> {
    match state.orders.get_order(id) {
        Ok(order) => {
            state.authorizer.authorize_owner(caller, &order.user_id, action)?;
            Ok(order)
        }
        Err(ManagerError::OrderNotFound(_)) if !caller.role.is_admin() => {
            security_log!(WARN, "permission_denied", user_id = %caller.user_id, action = action);
            Err(AppError::new(ErrorCode::PermissionDenied))
        }
        Err(e) => Err(e.into()),
    }
}

/// 每行一个 [`OrderFrame`]；出错时写出错误帧并结束流
pub async fn list_orders(
    State(state): State<ServerState>,
    bearer: Bearer,
    Query(filter): Query<OrderFilter>,
) -> AppResult<Response> {
    let caller = state.authorizer.authenticate(bearer.as_deref()).await?;
    if filter.user_id.as_deref() != Some(caller.user_id.as_str()) {
        state.authorizer.require_admin(&caller, "list_orders")?;
    }

    let frames = state
        .orders
        .list_orders(filter)
        .scan(false, |failed, item| {
            if *failed {
                return futures::future::ready(None);
            }
            let frame = match item {
                Ok(order) => OrderFrame::Order(order),
                Err(e) => {
                    *failed = true;
                    let err = AppError::from(e);
                    OrderFrame::Error {
                        code: err.code.code(),
                        message: err.message,
                    }
                }
            };
            futures::future::ready(Some(Ok::<_, Infallible>(encode_frame(&frame))))
        });

    Ok(([(http::header::CONTENT_TYPE, NDJSON)], Body::from_stream(frames)).into_response())
}

fn encode_frame(frame: &OrderFrame) -> String {
    match serde_json::to_string(frame) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode order frame");
            let code = ErrorCode::InternalError;
            format!(
                "{{\"error\":{{\"code\":{},\"message\":\"{}\"}}}}\n",
                code.code(),
                code.message()
            )
        }
    }
}

pub async fn cancel_order(
    State(state): State<ServerState>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let caller = state.authorizer.authenticate(bearer.as_deref()).await?;
    owned_order(&state, &caller, &id, "cancel_order")?;
    let order = state.orders.cancel_order(&id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn approve_order(
    State(state): State<ServerState>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let caller = state.authorizer.authenticate(bearer.as_deref()).await?;
    state.authorizer.require_admin(&caller, "approve_order")?;

    let order = state.orders.approve_order(&id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub orders: u64,
    pub pending_events: u64,
    pub bus_subscribers: usize,
    pub bus_observers: usize,
    pub bus_clients: usize,
}

pub async fn health(State(state): State<ServerState>) -> AppResult<Json<ApiResponse<HealthResponse>>> {
    let storage = state.orders.storage();
    let (orders, pending_events) = storage
        .order_count()
        .and_then(|orders| Ok((orders, storage.pending_count()?)))
        .map_err(store_unavailable)?;

    Ok(Json(ApiResponse::success(HealthResponse {
        status: "ok",
        orders,
        pending_events,
        bus_subscribers: state.bus.subscriber_count(),
        bus_observers: state.bus.observer_count(),
        bus_clients: state.bus.get_connected_clients().len(),
    })))
}

/// 存储错误只写日志，响应里只有错误码
fn store_unavailable(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "Health check failed to read order store");
    AppError::new(ErrorCode::DatabaseError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_detail_stays_in_logs() {
        let err = store_unavailable("/var/lib/orders.redb: database already open");
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("redb"));
    }
}
