//! Shared types for the order-commerce services
//!
//! Common types used across the gateway and the backend services: error
//! taxonomy, domain models, session token codec, event bus wire format
//! and logging setup.

pub mod error;
pub mod extract;
pub mod logger;
pub mod message;
pub mod models;
pub mod session;
pub mod util;

// Re-exports
pub use axum::Json;
pub use error::{ApiResponse, AppError, AppResult, ErrorCode};
pub use http;

// Message bus re-exports (for convenient access)
pub use message::{BusMessage, EventType};
