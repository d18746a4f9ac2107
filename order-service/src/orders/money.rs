//! Money calculation utilities using rust_decimal for precision
//!
//! 计算全部使用 `Decimal`，存储与序列化时转换回 `f64`。

use rust_decimal::prelude::*;
use shared::models::OrderItem;

use super::manager::ManagerError;

/// Rounding strategy for monetary values (2 decimal places, half-up)
const DECIMAL_PLACES: u32 = 2;

/// Tolerance for monetary comparisons (0.01)
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Maximum allowed quantity per item
const MAX_QUANTITY: u32 = 9999;

/// Maximum allowed order total
const MAX_TOTAL: f64 = 1_000_000.0;

#[inline]
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Convert Decimal back to f64 for storage, rounded to 2 decimal places
#[inline]
pub fn to_f64(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or_default()
}

fn require_amount(value: f64, field_name: &str) -> Result<(), ManagerError> {
    if !value.is_finite() {
        return Err(ManagerError::Validation(format!(
            "{} must be a finite number, got {}",
            field_name, value
        )));
    }
    if value < 0.0 {
        return Err(ManagerError::Validation(format!(
            "{} must be non-negative, got {}",
            field_name, value
        )));
    }
    if value > MAX_TOTAL {
        return Err(ManagerError::Validation(format!(
            "{} exceeds maximum allowed ({})",
            field_name, MAX_TOTAL
        )));
    }
    Ok(())
}

/// Validate items and settle the order total
///
/// - 全部条目带单价：按单价重算，调用方金额必须一致 (误差 0.01 内)
/// - 全部条目不带单价：接受调用方金额
/// - 混合：拒绝
pub fn settle_total(items: &[OrderItem], caller_total: f64) -> Result<f64, ManagerError> {
    if items.is_empty() {
        return Err(ManagerError::EmptyOrder);
    }

    for item in items {
        if item.product_id.trim().is_empty() {
            return Err(ManagerError::Validation("product_id must not be empty".into()));
        }
        if item.quantity == 0 || item.quantity > MAX_QUANTITY {
            return Err(ManagerError::Validation(format!(
                "quantity must be between 1 and {}, got {}",
                MAX_QUANTITY, item.quantity
            )));
        }
        if let Some(price) = item.unit_price {
            require_amount(price, "unit_price")?;
        }
    }
    require_amount(caller_total, "total")?;

    let priced = items.iter().filter(|i| i.unit_price.is_some()).count();
    if priced == 0 {
        return Ok(to_f64(to_decimal(caller_total)));
    }
    if priced != items.len() {
        return Err(ManagerError::Validation(
            "either every item carries a unit_price or none does".into(),
        ));
    }

    let computed: Decimal = items
        .iter()
        .map(|i| to_decimal(i.unit_price.unwrap_or_default()) * Decimal::from(i.quantity))
        .sum();
    let computed = computed.round_dp(DECIMAL_PLACES);

    if (computed - to_decimal(caller_total)).abs() > MONEY_TOLERANCE {
        return Err(ManagerError::TotalMismatch {
            expected: to_f64(computed),
            actual: caller_total,
        });
    }
    Ok(to_f64(computed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpriced_accepts_caller_total() {
        let items = vec![OrderItem::new("p1", 2), OrderItem::new("p2", 1)];
        assert_eq!(settle_total(&items, 100.0).unwrap(), 100.0);
    }

    #[test]
    fn test_priced_recomputes() {
        let items = vec![
            OrderItem::new("p1", 3).with_price(0.1),
            OrderItem::new("p2", 1).with_price(0.2),
        ];
        assert_eq!(settle_total(&items, 0.5).unwrap(), 0.5);

        let err = settle_total(&items, 5.0).unwrap_err();
        assert!(matches!(err, ManagerError::TotalMismatch { expected, .. } if expected == 0.5));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(settle_total(&[], 0.0), Err(ManagerError::EmptyOrder)));
        assert!(matches!(
            settle_total(&[OrderItem::new("p1", 0)], 1.0),
            Err(ManagerError::Validation(_))
        ));
        assert!(matches!(
            settle_total(&[OrderItem::new("p1", 1)], -1.0),
            Err(ManagerError::Validation(_))
        ));
        assert!(matches!(
            settle_total(&[OrderItem::new("p1", 1)], f64::NAN),
            Err(ManagerError::Validation(_))
        ));
        let mixed = vec![OrderItem::new("p1", 1).with_price(2.0), OrderItem::new("p2", 1)];
        assert!(matches!(settle_total(&mixed, 2.0), Err(ManagerError::Validation(_))));
    }

    #[test]
    fn test_zero_total_allowed() {
        assert_eq!(settle_total(&[OrderItem::new("p1", 1)], 0.0).unwrap(), 0.0);
    }
}
