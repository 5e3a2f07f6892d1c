//! Transfer Orchestrator
//!
//! Drives one transfer from validation to commit. The pre-check on the
//! source snapshot only fails fast; the conditional decrement is what
//! actually prevents overdrawing a store under concurrent callers.
//!
//! No retries, no sleeps: a conflicting caller gets `ConcurrencyConflict`
//! with the current quantity and decides for itself.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::error::{StoreError, TransferError, ValidationError};
use super::state::TransferState;
use super::store::{AtomicTransferOutcome, InventoryStore};
use super::types::{
    RawTransferRequest, TransferId, TransferLogEntry, TransferReceipt, TransferRequest,
};
use super::validation::{fix_negative_stock, validate_quantity, validate_sufficient_stock};
use crate::logging::AUDIT_TARGET;

/// How the audit row is written after commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    /// Awaited in the transfer call; failures are logged and ignored
    #[default]
    Inline,
    /// Spawned on the current tokio runtime; `flush` waits for pending writes
    Detached,
    Disabled,
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Use the store's single-transaction transfer when it has one
    #[serde(default = "default_prefer_atomic")]
    pub prefer_atomic: bool,
    #[serde(default)]
    pub audit_mode: AuditMode,
}

fn default_prefer_atomic() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            prefer_atomic: default_prefer_atomic(),
            audit_mode: AuditMode::default(),
        }
    }
}

/// Everything resolved before the first write
struct Prepared {
    source_before: i64,
    dest_created: bool,
}

/// Transfer Orchestrator - the saga over two inventory rows
///
/// Detached audit writes still pending when the orchestrator is dropped are
/// aborted; call `flush` first.
pub struct TransferOrchestrator {
    store: Arc<dyn InventoryStore>,
    config: TransferConfig,
    audit_tasks: Mutex<JoinSet<()>>,
}

impl TransferOrchestrator {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self::with_config(store, TransferConfig::default())
    }

    pub fn with_config(store: Arc<dyn InventoryStore>, config: TransferConfig) -> Self {
        Self {
            store,
            config,
            audit_tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Wait for every detached audit write spawned so far
    pub async fn flush(&self) {
        let mut pending = std::mem::take(
            &mut *self.audit_tasks.lock().unwrap_or_else(|e| e.into_inner()),
        );
        let count = pending.len();
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Detached audit write did not complete");
            }
        }
        if count > 0 {
            debug!(count, "Detached audit writes flushed");
        }
    }

    /// Parse untyped input, then transfer
    pub async fn transfer_raw(
        &self,
        raw: &RawTransferRequest,
    ) -> Result<TransferReceipt, TransferError> {
        let req = TransferRequest::parse(raw).inspect_err(|e| {
            info!(error = %e, state = %TransferState::Rejected, "Transfer request rejected");
        })?;
        self.transfer(req).await
    }

    /// Move `req.quantity` units of a product from one store to another
    pub async fn transfer(&self, req: TransferRequest) -> Result<TransferReceipt, TransferError> {
        let transfer_id = TransferId::new();

        let result = self.run(transfer_id, &req).await;

        match &result {
            Ok(receipt) => info!(
                target: AUDIT_TARGET,
                transfer_id = %transfer_id,
                product_id = %req.product_id,
                from = %req.from_store_id,
                to = %req.to_store_id,
                quantity = req.quantity,
                source_after = receipt.source_after,
                dest_after = receipt.dest_after,
                "Transfer committed"
            ),
            Err(e) if e.is_fatal() => {} // already logged at the failure site
            Err(e) if !e.is_pre_mutation() => warn!(
                transfer_id = %transfer_id,
                code = e.code(),
                error = %e,
                state = %TransferState::PartiallyFailed,
                "Transfer failed after debit"
            ),
            Err(e) => info!(
                transfer_id = %transfer_id,
                product_id = %req.product_id,
                code = e.code(),
                error = %e,
                state = %TransferState::Rejected,
                "Transfer rejected"
            ),
        }

        result
    }

    async fn run(
        &self,
        transfer_id: TransferId,
        req: &TransferRequest,
    ) -> Result<TransferReceipt, TransferError> {
        self.enter(transfer_id, TransferState::Validating);
        Self::validate(req)?;

        let prepared = self.prepare(transfer_id, req).await?;

        let use_atomic = self.config.prefer_atomic && self.store.supports_atomic_transfer();
        let (source_after, dest_after) = if use_atomic {
            match self.commit_atomic(transfer_id, req).await {
                Err(TransferError::Store(StoreError::Unsupported)) => {
                    warn!(store = self.store.name(), "Atomic transfer advertised but unsupported, using saga");
                    self.commit_saga(transfer_id, req).await?
                }
                other => other?,
            }
        } else {
            self.commit_saga(transfer_id, req).await?
        };

        debug!(
            transfer_id = %transfer_id,
            source_before = prepared.source_before,
            source_after,
            dest_after,
            "Transfer writes complete"
        );

        self.enter(transfer_id, TransferState::Logging);
        self.audit(transfer_id, req).await;

        self.enter(transfer_id, TransferState::Committed);
        Ok(TransferReceipt {
            transfer_id,
            source_after,
            dest_after: Self::reported_qty(req, dest_after),
            dest_created: prepared.dest_created,
        })
    }

    fn enter(&self, transfer_id: TransferId, state: TransferState) {
        debug!(transfer_id = %transfer_id, state = %state, "Transfer state");
    }

    /// Step 1: no I/O
    fn validate(req: &TransferRequest) -> Result<(), TransferError> {
        validate_quantity(req.quantity)?;

        if req.from_store_id == req.to_store_id {
            return Err(ValidationError::SameStore.into());
        }

        if req.requested_by.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "requested_by",
            }
            .into());
        }

        Ok(())
    }

    /// Steps 2-4: read source, pre-check, resolve destination
    async fn prepare(
        &self,
        transfer_id: TransferId,
        req: &TransferRequest,
    ) -> Result<Prepared, TransferError> {
        self.enter(transfer_id, TransferState::FetchingSource);
        let source = self
            .store
            .get(&req.product_id, &req.from_store_id)
            .await?
            .ok_or_else(|| TransferError::SourceNotFound {
                product_id: req.product_id.to_string(),
                store_id: req.from_store_id.to_string(),
            })?;

        self.enter(transfer_id, TransferState::CheckingStock);
        let fix = fix_negative_stock(source.qty);
        if fix.was_negative {
            warn!(
                transfer_id = %transfer_id,
                product_id = %req.product_id,
                store_id = %req.from_store_id,
                original_qty = source.qty,
                "Refusing transfer from corrupted source"
            );
            return Err(TransferError::CorruptedSource {
                original: source.qty,
            });
        }
        validate_sufficient_stock(fix.corrected_qty, req.quantity).map_err(|_| {
            TransferError::InsufficientStock {
                available: fix.corrected_qty,
                requested: req.quantity,
            }
        })?;

        self.enter(transfer_id, TransferState::ResolvingDestination);
        let dest_created = match self.store.get(&req.product_id, &req.to_store_id).await? {
            Some(_) => false,
            None => {
                let outcome = self
                    .store
                    .create_if_absent(&req.product_id, &req.to_store_id, 0, 0)
                    .await
                    .map_err(|e| TransferError::DestinationCreate(e.to_string()))?;
                if outcome.created {
                    info!(
                        transfer_id = %transfer_id,
                        product_id = %req.product_id,
                        store_id = %req.to_store_id,
                        "Destination inventory record created"
                    );
                }
                outcome.created
            }
        };

        Ok(Prepared {
            source_before: fix.corrected_qty,
            dest_created,
        })
    }

    /// Steps 5-6 as separate single-row writes with compensation
    async fn commit_saga(
        &self,
        transfer_id: TransferId,
        req: &TransferRequest,
    ) -> Result<(i64, i64), TransferError> {
        self.enter(transfer_id, TransferState::Debiting);
        let debit = self
            .store
            .conditional_decrement(&req.product_id, &req.from_store_id, req.quantity)
            .await?;

        if !debit.applied {
            return Err(TransferError::ConcurrencyConflict {
                current_qty: fix_negative_stock(debit.current_qty).corrected_qty,
            });
        }

        // Debit is committed from here on; no cancellation past this point
        self.enter(transfer_id, TransferState::Crediting);
        match self
            .store
            .increment(&req.product_id, &req.to_store_id, req.quantity)
            .await
        {
            Ok(dest) => Ok((debit.current_qty, dest.qty)),
            Err(credit_err) => Err(self.compensate(transfer_id, req, credit_err).await),
        }
    }

    /// Return the debited units to the source after a failed credit
    async fn compensate(
        &self,
        transfer_id: TransferId,
        req: &TransferRequest,
        credit_err: StoreError,
    ) -> TransferError {
        let reason = credit_err.to_string();
        warn!(
            transfer_id = %transfer_id,
            product_id = %req.product_id,
            to = %req.to_store_id,
            error = %reason,
            "Credit failed after debit, compensating source"
        );

        match self
            .store
            .increment(&req.product_id, &req.from_store_id, req.quantity)
            .await
        {
            Ok(source) => {
                info!(
                    target: AUDIT_TARGET,
                    transfer_id = %transfer_id,
                    store_id = %req.from_store_id,
                    source_qty = source.qty,
                    "Compensation applied"
                );
                TransferError::TransferFailed {
                    reason,
                    compensated: true,
                }
            }
            Err(comp_err) => {
                error!(
                    target: AUDIT_TARGET,
                    transfer_id = %transfer_id,
                    product_id = %req.product_id,
                    from = %req.from_store_id,
                    to = %req.to_store_id,
                    quantity = req.quantity,
                    requested_by = %req.requested_by,
                    credit_error = %reason,
                    compensation_error = %comp_err,
                    state = %TransferState::PartiallyFailed,
                    "COMPENSATION FAILURE: units debited and not returned, manual reconciliation required"
                );
                TransferError::CompensationFailure {
                    reason,
                    compensation_error: comp_err.to_string(),
                }
            }
        }
    }

    /// Steps 5-6 inside one store transaction
    async fn commit_atomic(
        &self,
        transfer_id: TransferId,
        req: &TransferRequest,
    ) -> Result<(i64, i64), TransferError> {
        self.enter(transfer_id, TransferState::Debiting);
        let outcome = self
            .store
            .transfer_atomic(
                &req.product_id,
                &req.from_store_id,
                &req.to_store_id,
                req.quantity,
            )
            .await;

        match outcome {
            Ok(AtomicTransferOutcome::Applied {
                source_after,
                dest_after,
            }) => Ok((source_after, dest_after)),
            Ok(AtomicTransferOutcome::Insufficient { current_qty }) => {
                Err(TransferError::ConcurrencyConflict {
                    current_qty: fix_negative_stock(current_qty).corrected_qty,
                })
            }
            Err(StoreError::CommitUncertain(reason)) => {
                error!(
                    target: AUDIT_TARGET,
                    transfer_id = %transfer_id,
                    product_id = %req.product_id,
                    from = %req.from_store_id,
                    to = %req.to_store_id,
                    quantity = req.quantity,
                    error = %reason,
                    state = %TransferState::PartiallyFailed,
                    "Transfer commit outcome unknown, verify both rows before retrying"
                );
                Err(TransferError::TransferFailed {
                    reason,
                    compensated: false,
                })
            }
            // Rolled back; nothing moved
            Err(e) => Err(e.into()),
        }
    }

    /// Step 7: never affects the transfer result
    async fn audit(&self, transfer_id: TransferId, req: &TransferRequest) {
        let entry = TransferLogEntry::from_request(transfer_id, req, TransferState::Committed);

        match self.config.audit_mode {
            AuditMode::Disabled => {}
            AuditMode::Inline => {
                if let Err(e) = self.store.append_transfer_log(&entry).await {
                    warn!(transfer_id = %transfer_id, error = %e, "Transfer audit write failed");
                }
            }
            AuditMode::Detached => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let store = Arc::clone(&self.store);
                    let mut tasks = self.audit_tasks.lock().unwrap_or_else(|e| e.into_inner());
                    // Reap finished writes so the set only holds pending ones
                    while tasks.try_join_next().is_some() {}
                    tasks.spawn_on(
                        async move {
                            if let Err(e) = store.append_transfer_log(&entry).await {
                                warn!(transfer_id = %entry.transfer_id, error = %e, "Transfer audit write failed");
                            }
                        },
                        &handle,
                    );
                }
                Err(_) => {
                    if let Err(e) = self.store.append_transfer_log(&entry).await {
                        warn!(transfer_id = %transfer_id, error = %e, "Transfer audit write failed");
                    }
                }
            },
        }
    }

    /// Clamp a destination that was already corrupted before the credit
    fn reported_qty(req: &TransferRequest, raw: i64) -> i64 {
        let fix = fix_negative_stock(raw);
        if fix.was_negative {
            warn!(
                product_id = %req.product_id,
                store_id = %req.to_store_id,
                stored_qty = raw,
                "Destination still negative after credit; needs reconciliation"
            );
        }
        fix.corrected_qty
    }
}
