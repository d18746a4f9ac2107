use shared::error::{AppError, ErrorCode};
use shared::models::{OrderStatus, OrderTransition};
use thiserror::Error;

use super::super::storage::StorageError;

/// Manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} is {current}, cannot {transition}")]
    InvalidState {
        order_id: String,
        current: OrderStatus,
        transition: OrderTransition,
    },

    #[error("Order must contain at least one item")]
    EmptyOrder,

    #[error("Order total mismatch: expected {expected}, got {actual}")]
    TotalMismatch { expected: f64, actual: f64 },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<StorageError> for ManagerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::OrderNotFound(id) => ManagerError::OrderNotFound(id),
            StorageError::InvalidTransition {
                order_id,
                current,
                transition,
            } => ManagerError::InvalidState {
                order_id,
                current,
                transition,
            },
            other => ManagerError::Storage(other),
        }
    }
}

impl From<ManagerError> for AppError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::Storage(e) => {
                // 存储细节只写日志
                tracing::error!(error = %e, "Order store failure");
                AppError::new(ErrorCode::DatabaseError)
            }
            ManagerError::OrderNotFound(id) => {
                AppError::new(ErrorCode::OrderNotFound).with_detail("order_id", id)
            }
            ManagerError::InvalidState {
                order_id,
                current,
                transition,
            } => AppError::with_message(
                ErrorCode::OrderInvalidState,
                format!("Cannot {} an order that is {}", transition, current),
            )
            .with_detail("order_id", order_id)
            .with_detail("status", current.as_str()),
            ManagerError::EmptyOrder => AppError::new(ErrorCode::OrderEmpty),
            ManagerError::TotalMismatch { expected, actual } => {
                AppError::new(ErrorCode::OrderTotalMismatch)
                    .with_detail("expected", expected)
                    .with_detail("actual", actual)
            }
            ManagerError::Validation(msg) => AppError::validation(msg),
        }
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
