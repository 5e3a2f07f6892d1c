//! Integration Tests for the Transfer Saga
//!
//! Full transfers against the in-memory store, with injected store faults
//! standing in for I/O failures and races.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::inventory::error::{StoreError, TransferError, ValidationError};
use crate::inventory::orchestrator::{AuditMode, TransferConfig, TransferOrchestrator};
use crate::inventory::reconcile::Reconciler;
use crate::inventory::state::TransferState;
use crate::inventory::store::{
    AtomicTransferOutcome, CreateOutcome, DecrementOutcome, InMemoryStore, InventoryStore,
};
use crate::inventory::types::{
    InventoryRecord, ProductId, StoreId, TransferLogEntry, TransferRequest,
};

fn pid() -> ProductId {
    ProductId::new("sku-100").unwrap()
}

fn sid(s: &str) -> StoreId {
    StoreId::new(s).unwrap()
}

fn req(from: &str, to: &str, qty: i64) -> TransferRequest {
    TransferRequest::new(pid(), sid(from), sid(to), qty, "admin-1")
}

/// Harness with a seeded in-memory store and a saga-only orchestrator
struct TestHarness {
    store: Arc<InMemoryStore>,
    orchestrator: TransferOrchestrator,
}

impl TestHarness {
    fn new(seed: &[(&str, i64)]) -> Self {
        let store = Arc::new(InMemoryStore::new());
        for (store_id, qty) in seed {
            store.seed(InventoryRecord::new(pid(), sid(store_id), *qty, 0));
        }
        let orchestrator = TransferOrchestrator::with_config(
            store.clone(),
            TransferConfig {
                prefer_atomic: false,
                audit_mode: AuditMode::Inline,
            },
        );
        Self {
            store,
            orchestrator,
        }
    }

    fn qty(&self, store_id: &str) -> Option<i64> {
        self.store.qty(&pid(), &sid(store_id))
    }
}

// ========================================================================
// Happy Path
// ========================================================================

#[tokio::test]
async fn test_transfer_conserves_units() {
    let h = TestHarness::new(&[("north", 25), ("south", 4)]);

    let receipt = h.orchestrator.transfer(req("north", "south", 9)).await.unwrap();

    assert_eq!(receipt.source_after, 16);
    assert_eq!(receipt.dest_after, 13);
    assert!(!receipt.dest_created);
    assert_eq!(receipt.source_after + receipt.dest_after, 25 + 4);
    assert_eq!(h.qty("north"), Some(16));
    assert_eq!(h.qty("south"), Some(13));
}

#[tokio::test]
async fn test_full_drain_is_allowed() {
    let h = TestHarness::new(&[("north", 10), ("south", 2)]);

    let receipt = h.orchestrator.transfer(req("north", "south", 10)).await.unwrap();

    assert_eq!(receipt.source_after, 0);
    assert_eq!(receipt.dest_after, 12);
}

#[tokio::test]
async fn test_audit_entry_written_on_commit() {
    let h = TestHarness::new(&[("north", 10), ("south", 0)]);

    let receipt = h.orchestrator.transfer(req("north", "south", 3)).await.unwrap();

    let log = h.store.transfer_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].transfer_id, receipt.transfer_id);
    assert_eq!(log[0].status, TransferState::Committed);
    assert_eq!(log[0].quantity, 3);
    assert_eq!(log[0].requested_by, "admin-1");
}

// ========================================================================
// Rejections (no mutation)
// ========================================================================

#[tokio::test]
async fn test_over_request_leaves_records_unchanged() {
    let h = TestHarness::new(&[("north", 5), ("south", 1)]);

    let err = h.orchestrator.transfer(req("north", "south", 7)).await.unwrap_err();

    assert_eq!(
        err,
        TransferError::InsufficientStock {
            available: 5,
            requested: 7
        }
    );
    assert_eq!(err.available_hint(), Some(5));
    assert_eq!(h.qty("north"), Some(5));
    assert_eq!(h.qty("south"), Some(1));
    assert!(h.store.transfer_log().is_empty());
}

#[tokio::test]
async fn test_non_positive_quantity_performs_no_io() {
    let h = TestHarness::new(&[("north", 5)]);

    for qty in [0, -3] {
        let err = h.orchestrator.transfer(req("north", "south", qty)).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Validation(ValidationError::InvalidQuantity { .. })
        ));
    }
    assert_eq!(h.store.calls(), 0);
}

#[tokio::test]
async fn test_over_request_does_not_create_destination() {
    let h = TestHarness::new(&[("north", 5)]);

    assert!(h.orchestrator.transfer(req("north", "west", 6)).await.is_err());
    assert_eq!(h.qty("west"), None);
    assert_eq!(h.store.row_count(), 1);
}

// ========================================================================
// Destination get-or-create
// ========================================================================

#[tokio::test]
async fn test_destination_created_exactly_once() {
    let h = TestHarness::new(&[("north", 20)]);

    let receipt = h.orchestrator.transfer(req("north", "west", 5)).await.unwrap();
    assert!(receipt.dest_created);
    assert_eq!(receipt.dest_after, 5);

    let receipt = h.orchestrator.transfer(req("north", "west", 5)).await.unwrap();
    assert!(!receipt.dest_created);
    assert_eq!(receipt.dest_after, 10);

    let rows = h.store.list_for_product(&pid()).await.unwrap();
    let west_rows = rows.iter().filter(|r| r.store_id == sid("west")).count();
    assert_eq!(west_rows, 1);
}

#[tokio::test]
async fn test_retry_after_failed_credit_reuses_destination() {
    let h = TestHarness::new(&[("north", 20)]);

    // Destination row gets created, then the credit fails and is compensated
    h.store.faults().fail_increment_at(&sid("west"));
    let err = h.orchestrator.transfer(req("north", "west", 5)).await.unwrap_err();
    assert!(matches!(
        err,
        TransferError::TransferFailed {
            compensated: true,
            ..
        }
    ));
    assert_eq!(h.qty("west"), Some(0));
    assert_eq!(h.qty("north"), Some(20));

    // Caller retries once the store recovers
    h.store.faults().clear_increment_failures();
    let receipt = h.orchestrator.transfer(req("north", "west", 5)).await.unwrap();
    assert!(!receipt.dest_created);
    assert_eq!(receipt.dest_after, 5);
    assert_eq!(h.store.row_count(), 2);
}

// ========================================================================
// Compensation
// ========================================================================

#[tokio::test]
async fn test_credit_failure_is_compensated() {
    let h = TestHarness::new(&[("north", 10), ("south", 3)]);
    h.store.faults().fail_increment_at(&sid("south"));

    let err = h.orchestrator.transfer(req("north", "south", 4)).await.unwrap_err();

    assert!(matches!(
        err,
        TransferError::TransferFailed {
            compensated: true,
            ..
        }
    ));
    assert!(!err.is_fatal());
    // The debit did commit before being returned
    assert!(!err.is_pre_mutation());
    assert!(err.is_retryable());
    assert_eq!(h.qty("north"), Some(10));
    assert_eq!(h.qty("south"), Some(3));
    assert!(h.store.transfer_log().is_empty());
}

#[tokio::test]
async fn test_compensation_failure_is_fatal() {
    let h = TestHarness::new(&[("north", 10), ("south", 3)]);
    h.store.faults().fail_increment_at(&sid("south"));
    h.store.faults().fail_increment_at(&sid("north"));

    let err = h.orchestrator.transfer(req("north", "south", 4)).await.unwrap_err();

    assert!(matches!(err, TransferError::CompensationFailure { .. }));
    assert!(err.is_fatal());
    assert!(!err.is_pre_mutation());
    assert_eq!(err.code(), "COMPENSATION_FAILURE");
    // Units are stranded until an operator reconciles
    assert_eq!(h.qty("north"), Some(6));
    assert_eq!(h.qty("south"), Some(3));
}

// ========================================================================
// Audit is best-effort
// ========================================================================

#[tokio::test]
async fn test_audit_failure_does_not_fail_transfer() {
    let h = TestHarness::new(&[("north", 10), ("south", 0)]);
    h.store.faults().set_fail_append_log(true);

    let receipt = h.orchestrator.transfer(req("north", "south", 2)).await.unwrap();

    assert_eq!(receipt.source_after, 8);
    assert_eq!(h.qty("south"), Some(2));
    assert!(h.store.transfer_log().is_empty());
}

fn detached(north: i64) -> (Arc<InMemoryStore>, TransferOrchestrator) {
    let store = Arc::new(InMemoryStore::new());
    store.seed(InventoryRecord::new(pid(), sid("north"), north, 0));
    let orchestrator = TransferOrchestrator::with_config(
        store.clone(),
        TransferConfig {
            prefer_atomic: false,
            audit_mode: AuditMode::Detached,
        },
    );
    (store, orchestrator)
}

#[tokio::test]
async fn test_detached_audit_written_after_flush() {
    let (store, orchestrator) = detached(10);

    let receipt = orchestrator.transfer(req("north", "south", 1)).await.unwrap();
    orchestrator.flush().await;

    let log = store.transfer_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].transfer_id, receipt.transfer_id);
    assert_eq!(log[0].status, TransferState::Committed);
}

/// One-shot caller on a single-threaded runtime: flush before the runtime ends
#[test]
fn test_detached_audit_survives_runtime_shutdown_with_flush() {
    let (store, orchestrator) = detached(10);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        for _ in 0..3 {
            orchestrator.transfer(req("north", "south", 1)).await.unwrap();
        }
        orchestrator.flush().await;
    });
    drop(rt);

    assert_eq!(store.qty(&pid(), &sid("north")), Some(7));
    assert_eq!(store.transfer_log().len(), 3);
}

#[tokio::test]
async fn test_flush_without_pending_writes() {
    let (store, orchestrator) = detached(10);
    orchestrator.flush().await;
    assert!(store.transfer_log().is_empty());
}

// ========================================================================
// Concurrency
// ========================================================================

/// Both callers pass the snapshot pre-check, then race on the conditional debit
#[tokio::test]
async fn test_concurrent_over_subscription_one_wins() {
    let h = TestHarness::new(&[("north", 10), ("south", 0), ("east", 0)]);
    h.store.faults().hold_decrements(2);

    let (a, b) = futures::join!(
        h.orchestrator.transfer(req("north", "south", 6)),
        h.orchestrator.transfer(req("north", "east", 6)),
    );
    h.store.faults().release_decrements();

    let (winner, loser) = match (a, b) {
        (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
        other => panic!("expected exactly one success, got {other:?}"),
    };

    assert_eq!(winner.source_after, 4);
    assert_eq!(loser, TransferError::ConcurrencyConflict { current_qty: 4 });
    assert!(loser.is_retryable());
    assert_eq!(h.qty("north"), Some(4));
    assert_eq!(h.qty("south").unwrap() + h.qty("east").unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_never_overdraw() {
    let h = Arc::new(TestHarness::new(&[("north", 30)]));
    let targets = ["a", "b", "c", "d", "e"];

    let mut handles = Vec::new();
    for i in 0..40 {
        let h = Arc::clone(&h);
        let to = targets[i % targets.len()];
        handles.push(tokio::spawn(async move {
            h.orchestrator.transfer(req("north", to, 1 + (i as i64 % 3))).await
        }));
    }

    let mut moved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => {}
            Err(TransferError::InsufficientStock { .. })
            | Err(TransferError::ConcurrencyConflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    for t in targets {
        moved += h.qty(t).unwrap_or(0);
    }

    let north = h.qty("north").unwrap();
    assert!(north >= 0);
    assert_eq!(north + moved, 30);
}

// ========================================================================
// Corruption and reconciliation
// ========================================================================

#[tokio::test]
async fn test_corrupted_source_transferable_after_repair() {
    let h = TestHarness::new(&[("north", -5), ("south", 0)]);

    let err = h.orchestrator.transfer(req("north", "south", 1)).await.unwrap_err();
    assert_eq!(err, TransferError::CorruptedSource { original: -5 });

    let repair = Reconciler::new(h.store.clone())
        .repair_product(&pid())
        .await
        .unwrap();
    assert_eq!(repair.repaired.len(), 1);

    // Zero stock is now a plain sufficiency problem
    let err = h.orchestrator.transfer(req("north", "south", 1)).await.unwrap_err();
    assert_eq!(
        err,
        TransferError::InsufficientStock {
            available: 0,
            requested: 1
        }
    );
}

// ========================================================================
// Atomic path
// ========================================================================

/// In-memory store that also offers a single-transaction transfer
struct TransactionalStore {
    inner: InMemoryStore,
    tx_lock: AsyncMutex<()>,
    fail_begin: AtomicBool,
    /// Apply the writes, then report the commit as lost
    fail_commit: AtomicBool,
}

#[async_trait]
impl InventoryStore for TransactionalStore {
    fn name(&self) -> &'static str {
        "memory-tx"
    }

    async fn get(
        &self,
        p: &ProductId,
        s: &StoreId,
    ) -> Result<Option<InventoryRecord>, StoreError> {
        self.inner.get(p, s).await
    }

    async fn conditional_decrement(
        &self,
        p: &ProductId,
        s: &StoreId,
        amount: i64,
    ) -> Result<DecrementOutcome, StoreError> {
        self.inner.conditional_decrement(p, s, amount).await
    }

    async fn increment(
        &self,
        p: &ProductId,
        s: &StoreId,
        amount: i64,
    ) -> Result<InventoryRecord, StoreError> {
        self.inner.increment(p, s, amount).await
    }

    async fn create_if_absent(
        &self,
        p: &ProductId,
        s: &StoreId,
        initial_qty: i64,
        min_qty: i64,
    ) -> Result<CreateOutcome, StoreError> {
        self.inner.create_if_absent(p, s, initial_qty, min_qty).await
    }

    async fn append_transfer_log(&self, entry: &TransferLogEntry) -> Result<(), StoreError> {
        self.inner.append_transfer_log(entry).await
    }

    async fn list_for_product(&self, p: &ProductId) -> Result<Vec<InventoryRecord>, StoreError> {
        self.inner.list_for_product(p).await
    }

    async fn list_all(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        self.inner.list_all().await
    }

    async fn set_quantity(
        &self,
        p: &ProductId,
        s: &StoreId,
        qty: i64,
        min_qty: Option<i64>,
    ) -> Result<InventoryRecord, StoreError> {
        self.inner.set_quantity(p, s, qty, min_qty).await
    }

    async fn reset_if_negative(&self, p: &ProductId, s: &StoreId) -> Result<bool, StoreError> {
        self.inner.reset_if_negative(p, s).await
    }

    fn supports_atomic_transfer(&self) -> bool {
        true
    }

    async fn transfer_atomic(
        &self,
        p: &ProductId,
        from: &StoreId,
        to: &StoreId,
        amount: i64,
    ) -> Result<AtomicTransferOutcome, StoreError> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected begin failure".into()));
        }
        let _tx = self.tx_lock.lock().await;
        let debit = self.inner.conditional_decrement(p, from, amount).await?;
        if !debit.applied {
            return Ok(AtomicTransferOutcome::Insufficient {
                current_qty: debit.current_qty,
            });
        }
        match self.inner.increment(p, to, amount).await {
            Ok(_) if self.fail_commit.load(Ordering::SeqCst) => {
                Err(StoreError::CommitUncertain("connection reset during COMMIT".into()))
            }
            Ok(dest) => Ok(AtomicTransferOutcome::Applied {
                source_after: debit.current_qty,
                dest_after: dest.qty,
            }),
            Err(e) => {
                // Roll back the debit the way a transaction abort would
                self.inner.increment(p, from, amount).await?;
                Err(e)
            }
        }
    }
}

fn transactional(seed: &[(&str, i64)]) -> (Arc<TransactionalStore>, TransferOrchestrator) {
    let store = Arc::new(TransactionalStore {
        inner: InMemoryStore::new(),
        tx_lock: AsyncMutex::new(()),
        fail_begin: AtomicBool::new(false),
        fail_commit: AtomicBool::new(false),
    });
    for (store_id, qty) in seed {
        store
            .inner
            .seed(InventoryRecord::new(pid(), sid(store_id), *qty, 0));
    }
    let orchestrator = TransferOrchestrator::new(store.clone());
    (store, orchestrator)
}

#[tokio::test]
async fn test_atomic_path_commits() {
    let (store, orchestrator) = transactional(&[("north", 10)]);

    let receipt = orchestrator.transfer(req("north", "south", 10)).await.unwrap();

    assert_eq!(receipt.source_after, 0);
    assert_eq!(receipt.dest_after, 10);
    assert!(receipt.dest_created);
    assert_eq!(store.inner.transfer_log().len(), 1);
}

#[tokio::test]
async fn test_atomic_path_rollback_is_store_error() {
    let (store, orchestrator) = transactional(&[("north", 10), ("south", 1)]);
    store.inner.faults().fail_increment_at(&sid("south"));

    let err = orchestrator.transfer(req("north", "south", 3)).await.unwrap_err();

    assert!(matches!(err, TransferError::Store(StoreError::Unavailable(_))));
    assert!(err.is_pre_mutation());
    assert!(err.is_retryable());
    assert_eq!(store.inner.qty(&pid(), &sid("north")), Some(10));
    assert_eq!(store.inner.qty(&pid(), &sid("south")), Some(1));
}

#[tokio::test]
async fn test_atomic_path_begin_failure_is_store_error() {
    let (store, orchestrator) = transactional(&[("north", 10), ("south", 1)]);
    store.fail_begin.store(true, Ordering::SeqCst);

    let err = orchestrator.transfer(req("north", "south", 3)).await.unwrap_err();

    assert!(matches!(err, TransferError::Store(StoreError::Unavailable(_))));
    assert!(err.is_pre_mutation());
    assert_eq!(store.inner.qty(&pid(), &sid("north")), Some(10));
}

#[tokio::test]
async fn test_atomic_path_uncertain_commit_not_retryable() {
    let (store, orchestrator) = transactional(&[("north", 10), ("south", 1)]);
    store.fail_commit.store(true, Ordering::SeqCst);

    let err = orchestrator.transfer(req("north", "south", 3)).await.unwrap_err();

    assert!(matches!(
        err,
        TransferError::TransferFailed {
            compensated: false,
            ..
        }
    ));
    assert!(!err.is_pre_mutation());
    assert!(!err.is_retryable());
    // The commit went through even though the caller never saw it
    assert_eq!(store.inner.qty(&pid(), &sid("north")), Some(7));
    assert_eq!(store.inner.qty(&pid(), &sid("south")), Some(4));
    assert!(store.inner.transfer_log().is_empty());
}

#[tokio::test]
async fn test_atomic_path_conflict() {
    let (store, orchestrator) = transactional(&[("north", 10), ("south", 0), ("east", 0)]);

    // Both callers pass the pre-check and queue on the transaction
    let guard = store.tx_lock.lock().await;
    let release = async move {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        drop(guard);
    };
    let ((a, b), ()) = futures::join!(
        async {
            futures::join!(
                orchestrator.transfer(req("north", "south", 6)),
                orchestrator.transfer(req("north", "east", 6)),
            )
        },
        release,
    );

    let conflicts = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(TransferError::ConcurrencyConflict { current_qty: 4 })))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(store.inner.qty(&pid(), &sid("north")), Some(4));
}
