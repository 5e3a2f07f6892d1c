
//! Reconciliation Sweep
//!
//! Turns a batch of raw rows into one corrected record per (product, store).
//! Upstream may hand back duplicate rows for a pair (legacy double writes);
//! duplicates collapse to the row with the highest `qty`, never to a sum.
//! Every aggregate in this module works on the swept output only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::error::StoreError;
use super::store::InventoryStore;
use super::types::{InventoryRecord, ProductId, StockAnomaly, StoreId};
use super::validation::sanitize_records;
use crate::logging::AUDIT_TARGET;

/// Output of a sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// One corrected record per (product, store), in first-seen order
    pub records: Vec<InventoryRecord>,
    pub anomalies: Vec<StockAnomaly>,
    /// Raw rows dropped as duplicates of another row for the same pair
    pub duplicates_collapsed: usize,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty() && self.duplicates_collapsed == 0
    }
}

/// Collapse duplicates, keeping the highest quantity per pair
///
/// Ties go to the most recently updated row.
fn dedupe(records: Vec<InventoryRecord>) -> (Vec<InventoryRecord>, usize) {
    let mut index: HashMap<(ProductId, StoreId), usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<InventoryRecord> = Vec::with_capacity(records.len());
    let mut collapsed = 0;

    for record in records {
        match index.get(&record.key()) {
            Some(&slot) => {
                collapsed += 1;
                let current = &mut kept[slot];
                warn!(
                    product_id = %record.product_id,
                    store_id = %record.store_id,
                    kept_qty = current.qty,
                    duplicate_qty = record.qty,
                    "Duplicate inventory row collapsed"
                );
                let wins = record.qty > current.qty
                    || (record.qty == current.qty && record.updated_at > current.updated_at);
                if wins {
                    *current = record;
                }
            }
            None => {
                index.insert(record.key(), kept.len());
                kept.push(record);
            }
        }
    }

    (kept, collapsed)
}

/// Deduplicate and clamp a batch of raw rows
pub fn sanitize(records: Vec<InventoryRecord>) -> SweepReport {
    let (deduped, duplicates_collapsed) = dedupe(records);
    let (records, anomalies) = sanitize_records(deduped);

    for anomaly in &anomalies {
        warn!(
            product_id = %anomaly.product_id,
            store_id = %anomaly.store_id,
            original_qty = anomaly.original_qty,
            corrected_qty = anomaly.corrected_qty,
            "Negative stock corrected at read boundary"
        );
    }

    SweepReport {
        records,
        anomalies,
        duplicates_collapsed,
    }
}

/// Total units of `product` across all stores
pub fn total_stock(report: &SweepReport, product_id: &ProductId) -> i64 {
    report
        .records
        .iter()
        .filter(|r| &r.product_id == product_id)
        .map(|r| r.qty)
        .sum()
}

/// Units of `product` per store
pub fn stock_by_store(report: &SweepReport, product_id: &ProductId) -> BTreeMap<StoreId, i64> {
    report
        .records
        .iter()
        .filter(|r| &r.product_id == product_id)
        .map(|r| (r.store_id.clone(), r.qty))
        .collect()
}

/// Records sitting below their reorder threshold
pub fn below_reorder_threshold(report: &SweepReport) -> Vec<&InventoryRecord> {
    report
        .records
        .iter()
        .filter(|r| r.qty < r.min_qty)
        .collect()
}

/// Outcome of writing corrections back to the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Rows reset from a negative value to zero
    pub repaired: Vec<StockAnomaly>,
    /// Anomalies already fixed by someone else before our write
    pub already_clean: usize,
}

/// Sweep bound to a record store
pub struct Reconciler {
    store: Arc<dyn InventoryStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Load and sweep every row of one product
    pub async fn load_product(&self, product_id: &ProductId) -> Result<SweepReport, StoreError> {
        let raw = self.store.list_for_product(product_id).await?;
        Ok(sanitize(raw))
    }

    /// Load and sweep the whole ledger
    pub async fn load_all(&self) -> Result<SweepReport, StoreError> {
        let raw = self.store.list_all().await?;
        Ok(sanitize(raw))
    }

    /// Persist zero for every negative row of `product_id`
    ///
    /// Uses `reset_if_negative`, so a row that became valid in the meantime
    /// is left alone.
    pub async fn repair_product(&self, product_id: &ProductId) -> Result<RepairReport, StoreError> {
        let report = self.load_product(product_id).await?;
        let mut repair = RepairReport::default();

        for anomaly in report.anomalies {
            if self
                .store
                .reset_if_negative(&anomaly.product_id, &anomaly.store_id)
                .await?
            {
                info!(
                    target: AUDIT_TARGET,
                    product_id = %anomaly.product_id,
                    store_id = %anomaly.store_id,
                    original_qty = anomaly.original_qty,
                    "Negative stock reset to zero"
                );
                repair.repaired.push(anomaly);
            } else {
                repair.already_clean += 1;
            }
        }

        Ok(repair)
    }
}
