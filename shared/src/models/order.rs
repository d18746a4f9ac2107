//! Order Model
//!
//! 订单状态机：
//!
//! ```text
//!            approve            cancel
//! Created ───────────▶ Approved ───────▶ Cancelled
//!    │                                      ▲
//!    └──────────────── cancel ──────────────┘
//! ```
//!
//! Cancelled 是终态；Approved 不能再次 approve。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status, stored as a plain string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Approved,
    Cancelled,
}

/// Lifecycle command applied to an existing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderTransition {
    Approve,
    Cancel,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::Approved => "Approved",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Target status for `transition`, or `None` when the table forbids it.
    pub fn apply(self, transition: OrderTransition) -> Option<OrderStatus> {
        match (self, transition) {
            (OrderStatus::Created, OrderTransition::Approve) => Some(OrderStatus::Approved),
            (OrderStatus::Created, OrderTransition::Cancel) => Some(OrderStatus::Cancelled),
            (OrderStatus::Approved, OrderTransition::Cancel) => Some(OrderStatus::Cancelled),
            (OrderStatus::Approved, OrderTransition::Approve) => None,
            (OrderStatus::Cancelled, _) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OrderTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderTransition::Approve => f.write_str("approve"),
            OrderTransition::Cancel => f.write_str("cancel"),
        }
    }
}

/// Order item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: u32,
    /// Unit price in currency unit; when every item has one the total is recomputed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
}

impl OrderItem {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price: None,
        }
    }

    pub fn with_price(mut self, unit_price: f64) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

/// Order entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    /// Total in currency unit
    pub total: f64,
    pub address: String,
    pub status: OrderStatus,
    /// Unix millis
    pub created_at: i64,
    /// Unix millis, bumped on every transition
    pub updated_at: i64,
}

/// Create order payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub total: f64,
    pub address: String,
}

/// Listing filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub user_id: Option<String>,
}

/// One line of a server-streamed order listing (NDJSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderFrame {
    Order(Order),
    Error { code: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;
        use OrderTransition::*;

        assert_eq!(Created.apply(Approve), Some(Approved));
        assert_eq!(Created.apply(Cancel), Some(Cancelled));
        assert_eq!(Approved.apply(Cancel), Some(Cancelled));
        assert_eq!(Approved.apply(Approve), None);
        assert_eq!(Cancelled.apply(Cancel), None);
        assert_eq!(Cancelled.apply(Approve), None);
    }

    #[test]
    fn test_status_stored_as_plain_string() {
        assert_eq!(serde_json::to_string(&OrderStatus::Approved).unwrap(), "\"Approved\"");
    }

    #[test]
    fn test_frame_shape() {
        let frame = OrderFrame::Error {
            code: 4001,
            message: "Order not found".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["error"]["code"], 4001);
    }
}
