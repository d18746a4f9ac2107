//! api-gateway - Gateway Router
//!
//! 唯一对外的 HTTP 入口。把每个请求转发到负责的下游服务，
//! 原样携带调用方的 bearer 凭据，并统一超时、重试与错误映射。
//!
//! # 模块
//!
//! - [`client`] - 下游调用 (截止时间、只读重试、流聚合、错误净化)
//! - [`api`] - 对外路由

pub mod api;
pub mod client;
pub mod config;
pub mod state;

pub use config::Config;
pub use state::GatewayState;
