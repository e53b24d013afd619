//! Ledger Errors

use thiserror::Error;

/// Errors surfaced by ledger operations
///
/// Nothing here is fatal to the ledger itself: an incoherent snapshot
/// discards that capture only, and protocol misuse leaves state
/// untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    /// A captured snapshot failed verification (per-bank sum of
    /// accounts, or network-wide zero sum)
    #[error("incoherent snapshot")]
    IncoherentSnapshot,

    /// Settlement requested with no outstanding snapshot
    #[error("no snapshot taken - must request a snapshot before settling payments")]
    NoSnapshot,
}
