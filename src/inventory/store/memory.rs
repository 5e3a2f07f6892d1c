//! In-memory record store
//!
//! `DashMap`-backed store. Each row lives behind its shard lock, so the
//! check-and-write in `conditional_decrement` is atomic per row the same way a
//! single `UPDATE .. WHERE` is in PostgreSQL. Used by tests, demos and the
//! `memory` backend of the binary.
//!
//! Fault injection (`StoreFaults`) lets tests fail individual primitives and
//! hold callers at the debit step to force interleavings.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Barrier;
use tracing::debug;

use super::{CreateOutcome, DecrementOutcome, InventoryStore};
use crate::inventory::error::StoreError;
use crate::inventory::types::{InventoryRecord, ProductId, StoreId, TransferLogEntry};

type RowKey = (ProductId, StoreId);

/// Switches for simulating store failures
#[derive(Default)]
pub struct StoreFaults {
    fail_get: AtomicBool,
    fail_create: AtomicBool,
    fail_append_log: AtomicBool,
    /// Stores whose `increment` fails
    fail_increment: Mutex<HashSet<StoreId>>,
    /// Callers of `conditional_decrement` wait here first
    decrement_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl StoreFaults {
    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_append_log(&self, fail: bool) {
        self.fail_append_log.store(fail, Ordering::SeqCst);
    }

    pub fn fail_increment_at(&self, store_id: &StoreId) {
        self.fail_increment
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(store_id.clone());
    }

    pub fn clear_increment_failures(&self) {
        self.fail_increment
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Make `parties` debits rendezvous before any of them writes
    pub fn hold_decrements(&self, parties: usize) {
        *self
            .decrement_barrier
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(Barrier::new(parties)));
    }

    pub fn release_decrements(&self) {
        *self
            .decrement_barrier
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn increment_fails(&self, store_id: &StoreId) -> bool {
        self.fail_increment
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(store_id)
    }

    fn barrier(&self) -> Option<Arc<Barrier>> {
        self.decrement_barrier
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// In-memory `InventoryStore`
#[derive(Default)]
pub struct InMemoryStore {
    rows: DashMap<RowKey, InventoryRecord>,
    /// Extra rows returned by the list operations, standing in for legacy duplicate writes
    legacy_duplicates: Mutex<Vec<InventoryRecord>>,
    transfer_log: Mutex<Vec<TransferLogEntry>>,
    calls: AtomicUsize,
    faults: StoreFaults,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a row as-is, negative quantities included
    pub fn seed(&self, record: InventoryRecord) {
        self.rows.insert(record.key(), record);
    }

    /// Add a duplicate raw row for an existing (product, store) pair
    pub fn seed_duplicate(&self, record: InventoryRecord) {
        self.legacy_duplicates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    pub fn faults(&self) -> &StoreFaults {
        &self.faults
    }

    /// Number of rows, one per (product, store)
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Current quantity without counting as a store call
    pub fn qty(&self, product_id: &ProductId, store_id: &StoreId) -> Option<i64> {
        self.rows
            .get(&(product_id.clone(), store_id.clone()))
            .map(|r| r.qty)
    }

    pub fn transfer_log(&self) -> Vec<TransferLogEntry> {
        self.transfer_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of trait calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn with_duplicates(
        &self,
        mut rows: Vec<InventoryRecord>,
        filter: impl Fn(&InventoryRecord) -> bool,
    ) -> Vec<InventoryRecord> {
        let dups = self
            .legacy_duplicates
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        rows.extend(dups.iter().filter(|r| filter(r)).cloned());
        rows
    }

    fn sorted(mut rows: Vec<InventoryRecord>) -> Vec<InventoryRecord> {
        rows.sort_by(|a, b| {
            (&a.product_id, &a.store_id).cmp(&(&b.product_id, &b.store_id))
        });
        rows
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        self.touch();
        if self.faults.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected get failure".into()));
        }
        Ok(self
            .rows
            .get(&(product_id.clone(), store_id.clone()))
            .map(|r| r.value().clone()))
    }

    async fn conditional_decrement(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        amount: i64,
    ) -> Result<DecrementOutcome, StoreError> {
        self.touch();
        if let Some(barrier) = self.faults.barrier() {
            barrier.wait().await;
        }

        let key = (product_id.clone(), store_id.clone());
        let Some(mut row) = self.rows.get_mut(&key) else {
            return Err(StoreError::Constraint(format!(
                "no row for ({product_id}, {store_id})"
            )));
        };

        if row.qty < amount {
            debug!(product_id = %product_id, store_id = %store_id, current = row.qty, amount, "Conditional decrement not applied");
            return Ok(DecrementOutcome {
                applied: false,
                current_qty: row.qty,
            });
        }

        row.qty -= amount;
        row.updated_at = Utc::now();
        Ok(DecrementOutcome {
            applied: true,
            current_qty: row.qty,
        })
    }

    async fn increment(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        amount: i64,
    ) -> Result<InventoryRecord, StoreError> {
        self.touch();
        if self.faults.increment_fails(store_id) {
            return Err(StoreError::Unavailable(format!(
                "injected increment failure at {store_id}"
            )));
        }

        let key = (product_id.clone(), store_id.clone());
        let Some(mut row) = self.rows.get_mut(&key) else {
            return Err(StoreError::Constraint(format!(
                "no row for ({product_id}, {store_id})"
            )));
        };

        row.qty = row
            .qty
            .checked_add(amount)
            .ok_or_else(|| StoreError::Constraint("quantity overflow".into()))?;
        row.updated_at = Utc::now();
        Ok(row.value().clone())
    }

    async fn create_if_absent(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        initial_qty: i64,
        min_qty: i64,
    ) -> Result<CreateOutcome, StoreError> {
        self.touch();
        if self.faults.fail_create.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected create failure".into()));
        }

        let mut created = false;
        let record = self
            .rows
            .entry((product_id.clone(), store_id.clone()))
            .or_insert_with(|| {
                created = true;
                InventoryRecord::new(product_id.clone(), store_id.clone(), initial_qty, min_qty)
            })
            .value()
            .clone();

        Ok(CreateOutcome { record, created })
    }

    async fn append_transfer_log(&self, entry: &TransferLogEntry) -> Result<(), StoreError> {
        self.touch();
        if self.faults.fail_append_log.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected audit failure".into()));
        }
        self.transfer_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }

    async fn list_for_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<InventoryRecord>, StoreError> {
        self.touch();
        let rows: Vec<InventoryRecord> = self
            .rows
            .iter()
            .filter(|r| &r.product_id == product_id)
            .map(|r| r.value().clone())
            .collect();
        Ok(self.with_duplicates(Self::sorted(rows), |r| &r.product_id == product_id))
    }

    async fn list_all(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        self.touch();
        let rows: Vec<InventoryRecord> = self.rows.iter().map(|r| r.value().clone()).collect();
        Ok(self.with_duplicates(Self::sorted(rows), |_| true))
    }

    async fn set_quantity(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
        qty: i64,
        min_qty: Option<i64>,
    ) -> Result<InventoryRecord, StoreError> {
        self.touch();
        let mut row = self
            .rows
            .entry((product_id.clone(), store_id.clone()))
            .or_insert_with(|| {
                InventoryRecord::new(product_id.clone(), store_id.clone(), qty, 0)
            });
        row.qty = qty;
        if let Some(min_qty) = min_qty {
            row.min_qty = min_qty;
        }
        row.updated_at = Utc::now();
        Ok(row.value().clone())
    }

    async fn reset_if_negative(
        &self,
        product_id: &ProductId,
        store_id: &StoreId,
    ) -> Result<bool, StoreError> {
        self.touch();
        match self.rows.get_mut(&(product_id.clone(), store_id.clone())) {
            Some(mut row) if row.qty < 0 => {
                row.qty = 0;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
