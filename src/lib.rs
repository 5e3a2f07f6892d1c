//! Stock Ledger - multi-store inventory transfer and reconciliation engine
//!
//! # Modules
//!
//! - [`inventory`] - validation, record store, reconciliation sweep, transfer saga
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool management

pub mod config;
pub mod db;
pub mod inventory;
pub mod logging;

pub use inventory::{
    InMemoryStore, InventoryRecord, InventoryStore, PgInventoryStore, ProductId, Reconciler,
    StockAnomaly, StockEditor, StoreId, SweepReport, TransferError, TransferOrchestrator,
    TransferReceipt, TransferRequest,
};
