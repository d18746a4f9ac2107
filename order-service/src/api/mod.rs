//! Order Lifecycle RPC 路由
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /rpc/orders | POST | 创建订单 |
//! | /rpc/orders | GET | 订单列表 (?user_id=)，NDJSON 流 |
//! | /rpc/orders/{id} | GET | 订单详情 |
//! | /rpc/orders/{id}/cancel | POST | 取消订单 |
//! | /rpc/orders/{id}/approve | POST | 审核订单 (管理员) |
//! | /health | GET | 健康检查 |
//!
//! 除 /health 外都需要 bearer 令牌，授权规则见 [`crate::auth`]。

mod handler;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::ServerState;

/// Content type of the streamed listing
pub const NDJSON: &str = "application/x-ndjson";

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route(
            "/rpc/orders",
            post(handler::create_order).get(handler::list_orders),
        )
        .route("/rpc/orders/{id}", get(handler::get_order))
        .route("/rpc/orders/{id}/cancel", post(handler::cancel_order))
        .route("/rpc/orders/{id}/approve", post(handler::approve_order))
        .route("/health", get(handler::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
