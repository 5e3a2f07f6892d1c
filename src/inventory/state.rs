//! Transfer State Definitions
//!
//! States a single transfer moves through inside the orchestrator. Only the
//! terminal state ends up persisted (in the audit log).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer saga states
///
/// Terminal states: COMMITTED, REJECTED, PARTIALLY_FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    /// Request shape and quantity checks, no I/O
    Validating,

    /// Reading the source record
    FetchingSource,

    /// Corruption and sufficiency pre-check on the source snapshot
    CheckingStock,

    /// Get-or-create of the destination record
    ResolvingDestination,

    /// Conditional decrement of the source
    Debiting,

    /// Increment of the destination
    /// CRITICAL: source already debited, units are in flight
    Crediting,

    /// Best-effort audit write
    Logging,

    /// Terminal: both sides written
    Committed,

    /// Terminal: nothing was mutated
    Rejected,

    /// Terminal: debit committed, credit failed, compensation attempted
    PartiallyFailed,
}

impl TransferState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Committed | TransferState::Rejected | TransferState::PartiallyFailed
        )
    }

    /// Source debited, destination not yet confirmed
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TransferState::Crediting)
    }

    /// Abandoning the orchestration here leaves no partial state
    #[inline]
    pub fn is_cancel_safe(&self) -> bool {
        matches!(
            self,
            TransferState::Validating
                | TransferState::FetchingSource
                | TransferState::CheckingStock
                | TransferState::ResolvingDestination
                | TransferState::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Validating => "VALIDATING",
            TransferState::FetchingSource => "FETCHING_SOURCE",
            TransferState::CheckingStock => "CHECKING_STOCK",
            TransferState::ResolvingDestination => "RESOLVING_DESTINATION",
            TransferState::Debiting => "DEBITING",
            TransferState::Crediting => "CREDITING",
            TransferState::Logging => "LOGGING",
            TransferState::Committed => "COMMITTED",
            TransferState::Rejected => "REJECTED",
            TransferState::PartiallyFailed => "PARTIALLY_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALIDATING" => Some(TransferState::Validating),
            "FETCHING_SOURCE" => Some(TransferState::FetchingSource),
            "CHECKING_STOCK" => Some(TransferState::CheckingStock),
            "RESOLVING_DESTINATION" => Some(TransferState::ResolvingDestination),
            "DEBITING" => Some(TransferState::Debiting),
            "CREDITING" => Some(TransferState::Crediting),
            "LOGGING" => Some(TransferState::Logging),
            "COMMITTED" => Some(TransferState::Committed),
            "REJECTED" => Some(TransferState::Rejected),
            "PARTIALLY_FAILED" => Some(TransferState::PartiallyFailed),
            _ => None,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
