//! Public HTTP surface
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 下游 |
//! |------|------|------|
//! | /register, /login | POST | auth |
//! | /activate | GET | auth |
//! | /forgot-password, /reset-password, /refresh-token, /logout | POST | auth |
//! | /me | GET | auth |
//! | /admin/users | GET | auth (管理员) |
//! | /admin/users/{id} | GET/PUT/DELETE | auth (管理员) |
//! | /products, /products/{*rest} | 任意 | catalog (透传) |
//! | /orders | POST | orders |
//! | /orders/{id} | GET | orders |
//! | /orders/user/{user_id} | GET | orders (流式列表，聚合后返回) |
//! | /orders/{id}/cancel, /orders/{id}/approve | POST | orders |
//! | /health | GET | - |
//!
//! 网关不验证令牌：`Authorization` 头原样交给下游，由需要身份的服务自己判断。

mod handler;

use std::convert::Infallible;

use axum::Router;
use axum::extract::{DefaultBodyLimit, FromRequestParts};
use axum::http::request::Parts;
use axum::routing::{any, get, post};
use http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::client::{Call, X_REQUEST_ID};
use crate::state::GatewayState;

/// 入站请求体上限 (1MB)
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn router(state: GatewayState) -> Router {
    Router::new()
        // ========== Session Authority ==========
        .route("/register", post(handler::register))
        .route("/login", post(handler::login))
        .route("/activate", get(handler::activate))
        .route("/forgot-password", post(handler::forgot_password))
        .route("/reset-password", post(handler::reset_password))
        .route("/refresh-token", post(handler::refresh_token))
        .route("/me", get(handler::me))
        .route("/logout", post(handler::logout))
        .route("/admin/users", get(handler::list_users))
        .route(
            "/admin/users/{id}",
            get(handler::get_user)
                .put(handler::update_user)
                .delete(handler::delete_user),
        )
        // ========== Catalog ==========
        .route("/products", any(handler::products))
        .route("/products/{*rest}", any(handler::products))
        // ========== Orders ==========
        .route("/orders", post(handler::create_order))
        .route("/orders/{id}", get(handler::get_order))
        .route("/orders/user/{user_id}", get(handler::list_user_orders))
        .route("/orders/{id}/cancel", post(handler::cancel_order))
        .route("/orders/{id}/approve", post(handler::approve_order))
        .route("/health", get(handler::health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Call metadata carried from the inbound request to every downstream call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// 原始 `Authorization` 头，不做任何解析
    pub authorization: Option<HeaderValue>,
    pub request_id: Option<HeaderValue>,
}

impl CallContext {
    pub fn call(&self, method: Method, path: impl Into<String>) -> Call {
        let mut call = Call::new(method, path);
        call.authorization = self.authorization.clone();
        call.request_id = self.request_id.clone();
        call
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CallContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CallContext {
            authorization: parts.headers.get(http::header::AUTHORIZATION).cloned(),
            request_id: parts.headers.get(X_REQUEST_ID).cloned(),
        })
    }
}
