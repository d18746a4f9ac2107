//! Session Authority RPC 路由
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 说明 | 令牌 |
//! |------|------|------|------|
//! | /rpc/auth/register | POST | 注册 | 可选 (指定 admin 角色时需要) |
//! | /rpc/auth/login | POST | 登录 | 无 |
//! | /rpc/auth/activate | GET | 激活账户 (?token=) | 无 |
//! | /rpc/auth/forgot-password | POST | 申请重置密码 | 无 |
//! | /rpc/auth/reset-password | POST | 重置密码 | 无 |
//! | /rpc/auth/refresh-token | POST | 刷新令牌 | 必须 |
//! | /rpc/auth/me | GET | 当前用户 (实时读取) | 必须 |
//! | /rpc/auth/logout | POST | 注销令牌 | 必须 |
//! | /rpc/auth/validate | POST | 验证令牌 (纯计算) | 必须 |
//! | /rpc/auth/users | GET | 用户列表 | 管理员 |
//! | /rpc/auth/users/{id} | GET/PUT/DELETE | 用户管理 | 管理员 |
//! | /health | GET | 健康检查 | 无 |

mod handler;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::ServerState;

pub use shared::extract::Bearer;

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/rpc/auth/register", post(handler::register))
        .route("/rpc/auth/login", post(handler::login))
        .route("/rpc/auth/activate", get(handler::activate))
        .route("/rpc/auth/forgot-password", post(handler::forgot_password))
        .route("/rpc/auth/reset-password", post(handler::reset_password))
        .route("/rpc/auth/refresh-token", post(handler::refresh_token))
        .route("/rpc/auth/me", get(handler::me))
        .route("/rpc/auth/logout", post(handler::logout))
        .route("/rpc/auth/validate", post(handler::validate))
        .route("/rpc/auth/users", get(handler::list_users))
        .route(
            "/rpc/auth/users/{id}",
            get(handler::get_user)
                .put(handler::update_user)
                .delete(handler::delete_user),
        )
        .route("/health", get(handler::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
