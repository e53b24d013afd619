//! The ledger facade consumed by the request-handling layer

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::backup::BackupScheduler;
use crate::balance_store::BalanceStore;
use crate::error::LedgerError;
use crate::snapshot::{Snapshot, SnapshotManager};
use crate::types::{AccountRecord, BankRecord, Transfer};
use crate::DEFAULT_BACKUP_INTERVAL_MS;

/// Ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Interval between bank-balance backup flushes; account backups
    /// run at twice this interval, phase-offset by half of it.
    pub backup_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backup_interval: Duration::from_millis(DEFAULT_BACKUP_INTERVAL_MS),
        }
    }
}

/// Receiving ends of the backup channels, handed to the persistence
/// consumer exactly once
pub struct BackupChannels {
    pub banks: Receiver<BankRecord>,
    pub accounts: Receiver<AccountRecord>,
}

struct SchedulerHandle {
    quit: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// The in-memory balance ledger
///
/// An explicit instance owned by the service composition root and
/// shared into every handler; tests instantiate independent ledgers.
pub struct Ledger {
    store: Arc<BalanceStore>,
    snapshots: SnapshotManager,
    config: LedgerConfig,
    bank_tx: Sender<BankRecord>,
    account_tx: Sender<AccountRecord>,
    backup_rx: Mutex<Option<BackupChannels>>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    processed: AtomicU64,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        // Unbounded: the scheduler must never stall on the persistence
        // consumer, or the hot path would inherit its backpressure.
        let (bank_tx, bank_rx) = unbounded();
        let (account_tx, account_rx) = unbounded();

        Self {
            store: Arc::new(BalanceStore::new()),
            snapshots: SnapshotManager::new(),
            config,
            bank_tx,
            account_tx,
            backup_rx: Mutex::new(Some(BackupChannels {
                banks: bank_rx,
                accounts: account_rx,
            })),
            scheduler: Mutex::new(None),
            processed: AtomicU64::new(0),
        }
    }

    /// Take the backup channel receivers; returns None after the
    /// first call.
    pub fn take_backup_channels(&self) -> Option<BackupChannels> {
        self.backup_rx.lock().take()
    }

    /// Load persisted balances before traffic starts. Banks must come
    /// before their accounts so ids are preserved.
    pub fn restore(
        &self,
        banks: impl IntoIterator<Item = BankRecord>,
        accounts: impl IntoIterator<Item = AccountRecord>,
    ) {
        let mut bank_count = 0usize;
        for record in banks {
            self.store.restore_bank(&record);
            bank_count += 1;
        }
        let mut account_count = 0usize;
        for record in accounts {
            self.store.restore_account(&record);
            account_count += 1;
        }
        tracing::info!(banks = bank_count, accounts = account_count, "restored balances");
    }

    /// Apply one transfer: amount subtracted from the sender's bank
    /// and account, added to the receiver's.
    ///
    /// Never fails absent a programming error; unseen banks and
    /// accounts are created implicitly at zero.
    pub fn update_balances(&self, transfer: &Transfer) -> Result<(), LedgerError> {
        let sender = self.store.get_or_create(&transfer.sender.name);
        let receiver = self.store.get_or_create(&transfer.receiver.name);
        let amount = transfer.amount;

        // Pin the store shared across both legs so a snapshot capture
        // never observes half a transfer.
        let _pin = self.store.read_pin();
        sender.add(-i64::from(amount));
        sender.accounts().add(transfer.sender.account, -amount);
        receiver.add(i64::from(amount));
        receiver.accounts().add(transfer.receiver.account, amount);
        drop(_pin);

        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Capture and verify a point-in-time copy of all balances
    pub fn get_snapshot(&self) -> Result<Snapshot, LedgerError> {
        self.snapshots.capture(&self.store)
    }

    /// Settle the outstanding snapshot against the live balances
    pub fn settle_snapshot(&self) -> Result<(), LedgerError> {
        self.snapshots.settle(&self.store)
    }

    /// Discard the outstanding snapshot, if any
    pub fn cancel_snapshot(&self) {
        self.snapshots.cancel();
    }

    /// Spawn the backup scheduler task. Idempotent.
    pub fn start(&self) {
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            return;
        }
        let (quit_tx, quit_rx) = watch::channel(false);
        let scheduler = BackupScheduler::new(
            Arc::clone(&self.store),
            self.bank_tx.clone(),
            self.account_tx.clone(),
            self.config.backup_interval,
            quit_rx,
        );
        let task = tokio::spawn(scheduler.run());
        *slot = Some(SchedulerHandle { quit: quit_tx, task });
    }

    /// Stop the scheduler after one final full backup pass, so all
    /// current balances reach the persistence channels.
    pub async fn close(&self) {
        let handle = self.scheduler.lock().take();
        let Some(handle) = handle else { return };
        // Receiver dropping with the task also ends the loop
        let _ = handle.quit.send(true);
        if let Err(err) = handle.task.await {
            tracing::error!(%err, "backup scheduler task failed");
        }
    }

    /// Transfers processed since startup
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn bank_count(&self) -> usize {
        self.store.bank_count()
    }

    /// Human-readable balance listing for the periodic status log
    pub fn balances_summary(&self, with_accounts: bool) -> String {
        let mut out = String::from("bank balances:\n");
        self.store.for_each_bank(|bank| {
            let _ = writeln!(out, "  {}: {}", bank.name(), bank.balance());
            if with_accounts {
                bank.accounts().for_each(|account, balance| {
                    let _ = writeln!(out, "    {account}: {balance}");
                });
            }
        });
        out
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &BalanceStore {
        &self.store
    }
}
