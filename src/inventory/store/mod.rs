//! Inventory Record Store
//!
//! The system of record for (product, store) -> quantity. The engine only
//! relies on single-row atomicity: every method below touches one row, except
//! `transfer_atomic`, which stores may offer when they have real transactions.

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryStore, StoreFaults};
pub use postgres::PgInventoryStore;

use async_trait::async_trait;

use super::error::StoreError;
use super::types::{InventoryRecord, ProductId, StoreId, TransferLogEntry};

/// Result of a conditional decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecrementOutcome {
    /// `false` iff `current_qty < amount` at commit time
    pub applied: bool,
    /// Quantity after the write when applied, otherwise the quantity that blocked it
    pub current_qty: i64,
}

/// Result of a get-or-create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub record: InventoryRecord,
    /// `false` when the row already existed
    pub created: bool,
}

/// Result of a single-transaction transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicTransferOutcome {
    Applied { source_after: i64, dest_after: i64 },
    /// Nothing written; the source held `current_qty`
    Insufficient { current_qty: i64 },
}

/// Record store contract
///
/// Implementations must make `conditional_decrement` a single atomic
/// compare-and-write on the row (e.g. `UPDATE .. WHERE qty >= $amount`), not a
/// read followed by a write.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    async fn get(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
    ) -> Result<Option<InventoryRecord>, StoreError>;

    /// Subtract `amount` only if the row currently holds at least `amount`
    async fn conditional_decrement(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        amount: i64,
    ) -> Result<DecrementOutcome, StoreError>;

    /// Unconditionally add `amount`; the row must exist
    async fn increment(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        amount: i64,
    ) -> Result<InventoryRecord, StoreError>;

    /// Idempotent by (product, store): never creates a second row
    async fn create_if_absent(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        initial_qty: i64,
        min_qty: i64,
    ) -> Result<CreateOutcome, StoreError>;

    async fn append_transfer_log(&self, entry: &TransferLogEntry) -> Result<(), StoreError>;

    /// Raw rows for one product, duplicates and negatives included
    async fn list_for_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<InventoryRecord>, StoreError>;

    async fn list_all(&self) -> Result<Vec<InventoryRecord>, StoreError>;

    /// Overwrite quantity (and optionally the reorder threshold), creating the row if needed
    async fn set_quantity(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        qty: i64,
        min_qty: Option<i64>,
    ) -> Result<InventoryRecord, StoreError>;

    /// Write `qty = 0` only if the row is still negative. Returns whether it wrote.
    async fn reset_if_negative(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
    ) -> Result<bool, StoreError>;

    fn supports_atomic_transfer(&self) -> bool {
        false
    }

    /// Conditional debit and credit inside one transaction
    ///
    /// Any error other than `CommitUncertain` means the transaction rolled
    /// back and neither row changed.
    async fn transfer_atomic(
        &self,
        _product_id: &ProductId,
        _from: &StoreId,
        _to: &StoreId,
        _amount: i64,
    ) -> Result<AtomicTransferOutcome, StoreError> {
        Err(StoreError::Unsupported)
    }
}
