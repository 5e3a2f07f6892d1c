//! Validation Pipeline
//!
//! Pure checks shared by transfers and direct stock edits. No state, no I/O.

use super::error::ValidationError;
use super::types::{InventoryRecord, StockAnomaly};

/// Anything a caller may hand in as a quantity
///
/// Form and CLI input arrives as text, programmatic callers pass integers.
pub trait QuantityInput {
    /// Integer value, or `None` when the input is not an integer at all
    fn as_integer(&self) -> Option<i64>;

    /// Rendering used in the error message
    fn describe(&self) -> String;
}

macro_rules! int_quantity_input {
    ($($t:ty),*) => {
        $(
            impl QuantityInput for $t {
                fn as_integer(&self) -> Option<i64> {
                    i64::try_from(*self).ok()
                }

                fn describe(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

int_quantity_input!(i32, i64, u32, u64, usize);

impl QuantityInput for &str {
    fn as_integer(&self) -> Option<i64> {
        self.trim().parse::<i64>().ok()
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl QuantityInput for String {
    fn as_integer(&self) -> Option<i64> {
        self.as_str().as_integer()
    }

    fn describe(&self) -> String {
        self.clone()
    }
}

/// Check that `value` is a strictly positive integer
///
/// Zero, negatives, fractions and non-numeric text are all rejected.
pub fn validate_quantity<Q: QuantityInput>(value: Q) -> Result<i64, ValidationError> {
    match value.as_integer() {
        Some(qty) if qty > 0 => Ok(qty),
        _ => Err(ValidationError::InvalidQuantity {
            value: value.describe(),
        }),
    }
}

/// Check that `requested` units can be taken out of `available`
///
/// Taking exactly `available` drains the store to zero and is allowed.
pub fn validate_sufficient_stock(available: i64, requested: i64) -> Result<(), ValidationError> {
    if requested > available {
        return Err(ValidationError::InsufficientStock {
            available,
            requested,
        });
    }
    Ok(())
}

/// Outcome of clamping a stored quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockFix {
    pub corrected_qty: i64,
    pub was_negative: bool,
}

/// Clamp a stored quantity at zero
#[inline]
pub fn fix_negative_stock(raw_qty: i64) -> StockFix {
    StockFix {
        corrected_qty: raw_qty.max(0),
        was_negative: raw_qty < 0,
    }
}

/// Clamp every record, collecting one anomaly per negative row
///
/// Output order matches input order.
pub fn sanitize_records(
    records: Vec<InventoryRecord>,
) -> (Vec<InventoryRecord>, Vec<StockAnomaly>) {
    let mut anomalies = Vec::new();

    let clean = records
        .into_iter()
        .map(|mut record| {
            let fix = fix_negative_stock(record.qty);
            if fix.was_negative {
                anomalies.push(StockAnomaly {
                    product_id: record.product_id.clone(),
                    store_id: record.store_id.clone(),
                    original_qty: record.qty,
                    corrected_qty: fix.corrected_qty,
                });
                record.qty = fix.corrected_qty;
            }
            record
        })
        .collect();

    (clean, anomalies)
}
