//! Direct stock edits
//!
//! Single-record writes for stock counts and goods-in. Same validation rules
//! as transfers, no two-record saga.

use std::sync::Arc;

use tracing::info;

use super::error::{TransferError, ValidationError};
use super::store::InventoryStore;
use super::types::{InventoryRecord, ProductId, StoreId};
use super::validation::{QuantityInput, validate_quantity};
use crate::logging::AUDIT_TARGET;

pub struct StockEditor {
    store: Arc<dyn InventoryStore>,
}

impl StockEditor {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Overwrite the stock level of one (product, store) row
    ///
    /// Creates the row when the product was never tracked at that store.
    pub async fn set_stock_level<Q: QuantityInput>(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        value: Q,
        min_qty: Option<i64>,
    ) -> Result<InventoryRecord, TransferError> {
        let qty = validate_quantity(value)?;
        if let Some(min) = min_qty
            && min < 0
        {
            return Err(ValidationError::InvalidMinQty(min).into());
        }

        let record = self
            .store
            .set_quantity(product_id, store_id, qty, min_qty)
            .await?;

        info!(
            target: AUDIT_TARGET,
            product_id = %product_id,
            store_id = %store_id,
            qty = record.qty,
            min_qty = record.min_qty,
            "Stock level set"
        );
        Ok(record)
    }

    /// Add received units to a store
    pub async fn receive_stock<Q: QuantityInput>(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        amount: Q,
    ) -> Result<InventoryRecord, TransferError> {
        let amount = validate_quantity(amount)?;

        let outcome = self
            .store
            .create_if_absent(product_id, store_id, 0, 0)
            .await?;
        if outcome.record.qty < 0 {
            return Err(TransferError::CorruptedSource {
                original: outcome.record.qty,
            });
        }

        let record = self.store.increment(product_id, store_id, amount).await?;
        info!(
            target: AUDIT_TARGET,
            product_id = %product_id,
            store_id = %store_id,
            amount,
            qty = record.qty,
            "Stock received"
        );
        Ok(record)
    }
}
