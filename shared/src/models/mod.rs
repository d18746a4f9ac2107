//! Data models
//!
//! Shared between the gateway and the backend services (via HTTP JSON and the event bus).
//! All IDs are UUID v4 strings; timestamps are Unix millis.

pub mod event;
pub mod order;
pub mod user;

// Re-exports
pub use event::*;
pub use order::*;
pub use user::*;
