//! Ledger Core - in-memory balance ledger for the clearing network
//!
//! This crate provides the core engine of the clearing ledger:
//! - Concurrent per-bank and per-account balance storage
//! - Write-behind backup scheduling over outbound channels
//! - Snapshot capture, verification and settlement

pub mod account_index;
pub mod backup;
pub mod balance_store;
pub mod error;
pub mod ledger;
pub mod snapshot;
pub mod types;

pub use account_index::AccountIndex;
pub use backup::BackupScheduler;
pub use balance_store::{Bank, BalanceStore};
pub use error::LedgerError;
pub use ledger::{BackupChannels, Ledger, LedgerConfig};
pub use snapshot::{Snapshot, SnapshotBank, SnapshotManager};
pub use types::{AccountRecord, BankRecord, Party, Transfer};

/// Default interval between bank-balance backup flushes
pub const DEFAULT_BACKUP_INTERVAL_MS: u64 = 1000;
