//! Inventory Core Types
//!
//! Typed identifiers and records for the (product, store) ledger.
//! Rows coming out of a store adapter are converted into these types at the
//! adapter boundary; nothing past that point handles untyped rows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ValidationError;
use super::state::TransferState;

/// Longest identifier accepted for products and stores
pub const MAX_ID_LEN: usize = 64;

fn validate_identifier(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let value = raw.trim();

    if value.is_empty() {
        return Err(ValidationError::MissingField { field });
    }

    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::InvalidLength {
            field,
            max: MAX_ID_LEN,
            actual: value.len(),
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(ValidationError::InvalidFormat {
            field,
            value: value.to_string(),
        });
    }

    Ok(value.to_string())
}

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw identifier
            pub fn new(raw: &str) -> Result<Self, ValidationError> {
                validate_identifier($field, raw).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

ledger_id!(
    /// Product identifier (validated, trimmed)
    ProductId,
    "product_id"
);

ledger_id!(
    /// Store identifier (validated, trimmed)
    StoreId,
    "store_id"
);

/// Unique identifier assigned to each transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One (product, store) row of the ledger
///
/// `qty` is signed on purpose: upstream writers have been known to persist
/// negative values, and the engine has to be able to see them to correct them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub store_id: StoreId,
    pub qty: i64,
    /// Reorder threshold. Informational only, transfers never enforce it.
    pub min_qty: i64,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn new(product_id: ProductId, store_id: StoreId, qty: i64, min_qty: i64) -> Self {
        Self {
            product_id,
            store_id,
            qty,
            min_qty,
            updated_at: Utc::now(),
        }
    }

    /// Identity of the row
    pub fn key(&self) -> (ProductId, StoreId) {
        (self.product_id.clone(), self.store_id.clone())
    }
}

/// A validated request to move stock between two stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from_store_id: StoreId,
    pub to_store_id: StoreId,
    pub quantity: i64,
    pub requested_by: String,
}

impl TransferRequest {
    pub fn new(
        product_id: ProductId,
        from_store_id: StoreId,
        to_store_id: StoreId,
        quantity: i64,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            from_store_id,
            to_store_id,
            quantity,
            requested_by: requested_by.into(),
        }
    }

    /// Validate an untyped request (form input, CLI args, batch files)
    pub fn parse(raw: &RawTransferRequest) -> Result<Self, ValidationError> {
        let product_id = ProductId::new(&raw.product_id)?;
        let from_store_id = StoreId::new(&raw.from_store_id)?;
        let to_store_id = StoreId::new(&raw.to_store_id)?;
        let quantity = super::validation::validate_quantity(raw.quantity.as_str())?;

        let requested_by = raw.requested_by.trim();
        if requested_by.is_empty() {
            return Err(ValidationError::MissingField {
                field: "requested_by",
            });
        }

        Ok(Self {
            product_id,
            from_store_id,
            to_store_id,
            quantity,
            requested_by: requested_by.to_string(),
        })
    }
}

/// Transfer request as it arrives from an untyped caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransferRequest {
    pub product_id: String,
    pub from_store_id: String,
    pub to_store_id: String,
    pub quantity: String,
    pub requested_by: String,
}

/// Append-only audit row written after a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLogEntry {
    pub transfer_id: TransferId,
    pub product_id: ProductId,
    pub from_store_id: StoreId,
    pub to_store_id: StoreId,
    pub quantity: i64,
    pub requested_by: String,
    pub status: TransferState,
    pub timestamp: DateTime<Utc>,
}

impl TransferLogEntry {
    pub fn from_request(
        transfer_id: TransferId,
        req: &TransferRequest,
        status: TransferState,
    ) -> Self {
        Self {
            transfer_id,
            product_id: req.product_id.clone(),
            from_store_id: req.from_store_id.clone(),
            to_store_id: req.to_store_id.clone(),
            quantity: req.quantity,
            requested_by: req.requested_by.clone(),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// A stored quantity below zero, surfaced for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAnomaly {
    pub product_id: ProductId,
    pub store_id: StoreId,
    pub original_qty: i64,
    pub corrected_qty: i64,
}

/// Result of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub source_after: i64,
    pub dest_after: i64,
    /// Destination row did not exist before this transfer
    pub dest_created: bool,
}
