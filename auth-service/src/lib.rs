//! auth-service - Session Authority
//!
//! 签发与验证会话令牌，管理用户凭据，并以实时管理员检查守护所有管理操作。
//!
//! # 模块
//!
//! - [`service`] - 注册、登录、令牌、管理员操作
//! - [`storage`] - 基于 redb 的凭据存储
//! - [`password`] - argon2 + pepper 密码哈希
//! - [`revocation`] - 注销令牌列表
//! - [`api`] - HTTP RPC 路由

pub mod api;
pub mod config;
pub mod notifier;
pub mod password;
pub mod revocation;
pub mod service;
pub mod state;
pub mod storage;

pub use config::Config;
pub use service::{AuthError, AuthService};
pub use state::ServerState;
