//! order-service - Order Lifecycle Manager and Event Bus
//!
//! 订单状态机 (Created → Approved / Cancelled)、基于 outbox 的
//! at-least-once 事件投递，以及外部订阅方使用的 TCP 事件总线。
//!
//! # 模块
//!
//! - [`orders`] - 存储、状态迁移、outbox 重投
//! - [`message`] - 事件总线与幂等订阅端
//! - [`auth`] - 调用方身份与授权
//! - [`api`] - HTTP RPC 路由

pub mod api;
pub mod auth;
pub mod config;
pub mod message;
pub mod orders;
pub mod state;

pub use config::Config;
pub use orders::{ManagerError, OrdersManager};
pub use state::ServerState;
