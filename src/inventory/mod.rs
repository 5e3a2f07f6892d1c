//! Multi-store Inventory Transfer Engine
//!
//! Moves stock of a product between stores without letting any store go
//! negative and without losing or duplicating units.
//!
//! # Architecture
//!
//! - **Validation** - pure quantity and stock checks
//! - **Record store** - (product, store) -> qty, single-row atomic writes only
//! - **Reconciliation** - dedupes raw rows and clamps negative quantities
//! - **Orchestrator** - the transfer saga below
//!
//! # State Machine
//!
//! ```text
//! VALIDATING → FETCHING_SOURCE → CHECKING_STOCK → RESOLVING_DESTINATION
//!      ↓              ↓                ↓                   ↓
//!   REJECTED       REJECTED         REJECTED            REJECTED
//!
//! → DEBITING → CREDITING → LOGGING → COMMITTED
//!      ↓           ↓
//!   REJECTED   PARTIALLY_FAILED (compensation attempted)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Non-negative reads**: quantities handed to callers are clamped at zero
//! 2. **Conservation**: a committed transfer leaves `source + dest` unchanged
//! 3. **Conditional debit**: the source is only decremented by a single-row
//!    `qty >= amount` write; the snapshot pre-check is a fast path only

pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod state;
pub mod stock_edit;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
mod integration_tests;

pub use error::{StoreError, TransferError, ValidationError};
pub use orchestrator::{AuditMode, TransferConfig, TransferOrchestrator};
pub use reconcile::{Reconciler, RepairReport, SweepReport, sanitize, total_stock};
pub use state::TransferState;
pub use stock_edit::StockEditor;
pub use store::{InMemoryStore, InventoryStore, PgInventoryStore};
pub use types::{
    InventoryRecord, ProductId, RawTransferRequest, StockAnomaly, StoreId, TransferId,
    TransferLogEntry, TransferReceipt, TransferRequest,
};
pub use validation::{
    fix_negative_stock, sanitize_records, validate_quantity, validate_sufficient_stock,
};
