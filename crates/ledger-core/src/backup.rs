//! Write-behind backup scheduling
//!
//! Keeps the durable store eventually consistent with the in-memory
//! ledger without the hot path ever blocking on I/O. Bank balances are
//! flushed every interval; account balances are staggered one bank per
//! tick through a round-robin ring, bounding write volume at the cost
//! of a bank's account backup lagging by up to bank_count * 2T.

use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::balance_store::BalanceStore;
use crate::types::{AccountRecord, BankRecord};

/// Periodic flusher of full current balances to the backup channels
///
/// Every record carries the authoritative current value, never a
/// delta, so a failed or dropped write self-heals on the next tick
/// and no retry queue is needed.
pub struct BackupScheduler {
    store: Arc<BalanceStore>,
    bank_tx: Sender<BankRecord>,
    account_tx: Sender<AccountRecord>,
    interval: Duration,
    /// Round-robin ring of bank names; owned by the scheduler task
    /// alone, so it needs no synchronization.
    ring: Vec<String>,
    cursor: usize,
    quit: watch::Receiver<bool>,
}

impl BackupScheduler {
    pub(crate) fn new(
        store: Arc<BalanceStore>,
        bank_tx: Sender<BankRecord>,
        account_tx: Sender<AccountRecord>,
        interval: Duration,
        quit: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            bank_tx,
            account_tx,
            interval,
            ring: Vec::new(),
            cursor: 0,
            quit,
        }
    }

    /// Timer loop; spawned as a dedicated task by `Ledger::start`.
    ///
    /// Bank balances flush every interval T; account balances every
    /// 2T, phase-offset by T/2 so the two timers never coincide.
    pub async fn run(mut self) {
        let start = tokio::time::Instant::now();
        let mut bank_tick = tokio::time::interval_at(start + self.interval, self.interval);
        bank_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut account_tick = tokio::time::interval_at(
            start + self.interval / 2 + self.interval * 2,
            self.interval * 2,
        );
        account_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "backup scheduler started");

        loop {
            tokio::select! {
                _ = self.quit.changed() => {
                    self.final_pass();
                    tracing::info!("backup scheduler stopped");
                    return;
                }
                _ = bank_tick.tick() => self.flush_bank_balances(),
                _ = account_tick.tick() => self.flush_next_bank_accounts(),
            }
        }
    }

    /// One final full backup: every bank balance plus every bank's
    /// accounts, so nothing is lost on graceful shutdown.
    fn final_pass(&mut self) {
        self.flush_bank_balances();
        self.refresh_ring();
        for _ in 0..self.ring.len() {
            self.flush_next_bank_accounts();
        }
    }

    /// Push every bank's current balance to the bank channel
    fn flush_bank_balances(&self) {
        let mut disconnected = false;
        self.store.for_each_bank(|bank| {
            let record = BankRecord {
                id: bank.id(),
                name: bank.name().to_string(),
                balance: bank.balance(),
            };
            if self.bank_tx.send(record).is_err() {
                disconnected = true;
            }
        });
        if disconnected {
            tracing::warn!("bank backup channel disconnected, records dropped");
        }
    }

    /// Advance the ring one bank and push all of its current account
    /// balances to the account channel
    fn flush_next_bank_accounts(&mut self) {
        self.refresh_ring();
        if self.ring.is_empty() {
            return;
        }
        self.cursor = (self.cursor + 1) % self.ring.len();
        let name = self.ring[self.cursor].clone();

        let Some(bank) = self.store.get(&name) else { return };
        let mut disconnected = false;
        bank.accounts().for_each(|account, balance| {
            let record = AccountRecord {
                bank_id: bank.id(),
                bank: name.clone(),
                account,
                balance,
            };
            if self.account_tx.send(record).is_err() {
                disconnected = true;
            }
        });
        if disconnected {
            tracing::warn!(bank = name.as_str(), "account backup channel disconnected, records dropped");
        }
    }

    /// Pick up banks created since the last tick; names only ever
    /// append, in insertion order.
    fn refresh_ring(&mut self) {
        let fresh = self.store.bank_names_from(self.ring.len());
        self.ring.extend(fresh);
    }
}
