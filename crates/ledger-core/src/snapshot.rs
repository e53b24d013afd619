//! Snapshot capture, verification and settlement
//!
//! State machine: NoSnapshot -> Captured -> {Settled | Cancelled} ->
//! NoSnapshot. At most one snapshot is outstanding at a time; a new
//! capture while one is pending replaces it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::balance_store::BalanceStore;
use crate::error::LedgerError;

/// Balances of one bank inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotBank {
    pub balance: i64,
    pub accounts: HashMap<u32, i32>,
}

/// A verified, point-in-time deep copy of all balances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    pub banks: HashMap<String, SnapshotBank>,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Sum of all bank balances; zero in a coherent snapshot
    pub fn total(&self) -> i64 {
        self.banks.values().map(|bank| bank.balance).sum()
    }
}

/// Owns the single outstanding snapshot and the settle/cancel protocol
#[derive(Default)]
pub struct SnapshotManager {
    pending: Mutex<Option<Snapshot>>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Capture a consistent copy of all balances.
    ///
    /// Holds the store's exclusive lock only for the O(banks +
    /// accounts) copy; both consistency checks run afterwards on the
    /// copied data. A failed check discards the capture and clears
    /// the pending slot, so an earlier stale capture can never be
    /// settled afterwards.
    pub fn capture(&self, store: &BalanceStore) -> Result<Snapshot, LedgerError> {
        let mut banks = HashMap::with_capacity(store.bank_count());
        {
            let guard = store.lock_exclusive();
            for (name, bank) in guard.banks() {
                banks.insert(
                    name.clone(),
                    SnapshotBank {
                        balance: bank.balance(),
                        accounts: bank.accounts().snapshot(),
                    },
                );
            }
        }

        let mut total = 0i64;
        for (name, bank) in &banks {
            let account_sum: i64 = bank.accounts.values().map(|b| i64::from(*b)).sum();
            if bank.balance != account_sum {
                tracing::error!(
                    bank = name.as_str(),
                    balance = bank.balance,
                    account_sum,
                    "account balances not synched with bank balance"
                );
                *self.pending.lock() = None;
                return Err(LedgerError::IncoherentSnapshot);
            }
            total += bank.balance;
        }
        if total != 0 {
            tracing::error!(total, "bank balances don't add to 0");
            *self.pending.lock() = None;
            return Err(LedgerError::IncoherentSnapshot);
        }

        let snapshot = Snapshot {
            banks,
            timestamp: Utc::now(),
        };
        *self.pending.lock() = Some(snapshot.clone());
        tracing::info!(banks = snapshot.banks.len(), "captured snapshot");
        Ok(snapshot)
    }

    /// Subtract the outstanding snapshot's values from the live
    /// balances, rebasing the captured portion to zero.
    ///
    /// Subtracting the captured delta (rather than storing zero)
    /// preserves any transfer that landed after capture. Each field is
    /// zeroed inside the stored snapshot as it is applied, guarding
    /// against double-settlement.
    pub fn settle(&self, store: &BalanceStore) -> Result<(), LedgerError> {
        let mut pending = self.pending.lock();
        let snapshot = pending.as_mut().ok_or(LedgerError::NoSnapshot)?;

        let pin = store.read_pin();
        for (name, snap_bank) in snapshot.banks.iter_mut() {
            // Banks created after capture have nothing to settle
            let Some(bank) = pin.bank(name) else { continue };

            bank.add(-snap_bank.balance);
            snap_bank.balance = 0;

            for (account, balance) in snap_bank.accounts.iter_mut() {
                bank.accounts().add(*account, -*balance);
                *balance = 0;
            }
        }
        drop(pin);

        *pending = None;
        tracing::info!("settled snapshot");
        Ok(())
    }

    /// Discard any outstanding snapshot; never fails.
    ///
    /// Called when a caller's request is abandoned between capture and
    /// settlement, so the pending slot is not left permanently stuck.
    pub fn cancel(&self) {
        if self.pending.lock().take().is_some() {
            tracing::info!("cancelled outstanding snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(store: &BalanceStore, from: (&str, u32), to: (&str, u32), amount: i32) {
        let sender = store.get_or_create(from.0);
        let receiver = store.get_or_create(to.0);
        let _pin = store.read_pin();
        sender.add(-i64::from(amount));
        sender.accounts().add(from.1, -amount);
        receiver.add(i64::from(amount));
        receiver.accounts().add(to.1, amount);
    }

    #[test]
    fn capture_copies_and_verifies() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        transfer(&store, ("A", 1), ("B", 1), 100);

        let snap = manager.capture(&store).unwrap();
        assert_eq!(snap.banks["A"].balance, -100);
        assert_eq!(snap.banks["A"].accounts[&1], -100);
        assert_eq!(snap.banks["B"].balance, 100);
        assert_eq!(snap.total(), 0);
        assert!(manager.is_pending());
    }

    #[test]
    fn incoherent_balances_fail_capture() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        transfer(&store, ("A", 1), ("B", 1), 100);
        // Skew a bank balance away from its account sum
        store.get("A").unwrap().add(7);

        assert_eq!(
            manager.capture(&store),
            Err(LedgerError::IncoherentSnapshot)
        );
        assert!(!manager.is_pending());
    }

    #[test]
    fn failed_capture_discards_earlier_pending_snapshot() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        transfer(&store, ("A", 1), ("B", 1), 100);
        manager.capture(&store).unwrap();

        // Skew a bank balance so the next capture fails verification
        store.get("A").unwrap().add(7);
        assert_eq!(
            manager.capture(&store),
            Err(LedgerError::IncoherentSnapshot)
        );

        // The first capture must not linger: settling now would apply
        // stale values, so the slot has to be empty.
        assert!(!manager.is_pending());
        assert_eq!(manager.settle(&store), Err(LedgerError::NoSnapshot));
        assert_eq!(store.get("A").unwrap().balance(), -93);
    }

    #[test]
    fn settle_rebases_captured_portion_to_zero() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        transfer(&store, ("A", 1), ("B", 1), 100);
        transfer(&store, ("B", 1), ("C", 1), 40);

        manager.capture(&store).unwrap();
        // Traffic landing after capture must survive settlement
        transfer(&store, ("C", 2), ("A", 2), 5);

        manager.settle(&store).unwrap();

        let a = store.get("A").unwrap();
        let b = store.get("B").unwrap();
        let c = store.get("C").unwrap();
        assert_eq!(a.balance(), 5);
        assert_eq!(b.balance(), 0);
        assert_eq!(c.balance(), -5);
        assert_eq!(a.accounts().balance(1), 0);
        assert_eq!(a.accounts().balance(2), 5);
        assert_eq!(c.accounts().balance(1), 0);
        assert_eq!(c.accounts().balance(2), -5);
    }

    #[test]
    fn settle_without_snapshot_fails() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        assert_eq!(manager.settle(&store), Err(LedgerError::NoSnapshot));
    }

    #[test]
    fn settle_consumes_the_snapshot() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        transfer(&store, ("A", 1), ("B", 1), 10);

        manager.capture(&store).unwrap();
        manager.settle(&store).unwrap();
        assert_eq!(manager.settle(&store), Err(LedgerError::NoSnapshot));
        // Live balances were settled exactly once
        assert_eq!(store.get("A").unwrap().balance(), 0);
    }

    #[test]
    fn capture_twice_replaces_pending() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        transfer(&store, ("A", 1), ("B", 1), 10);
        manager.capture(&store).unwrap();

        transfer(&store, ("A", 1), ("B", 1), 5);
        manager.capture(&store).unwrap();
        manager.settle(&store).unwrap();

        // The second capture's values were settled, not the first's
        assert_eq!(store.get("A").unwrap().balance(), 0);
        assert_eq!(store.get("B").unwrap().balance(), 0);
    }

    #[test]
    fn cancel_clears_pending_slot() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        transfer(&store, ("A", 1), ("B", 1), 10);

        manager.capture(&store).unwrap();
        manager.cancel();
        assert!(!manager.is_pending());
        assert_eq!(manager.settle(&store), Err(LedgerError::NoSnapshot));

        // Cancel with nothing outstanding is a no-op
        manager.cancel();
    }

    #[test]
    fn snapshot_serializes_wire_shape() {
        let store = BalanceStore::new();
        let manager = SnapshotManager::new();
        transfer(&store, ("A", 1), ("B", 1), 100);

        let snap = manager.capture(&store).unwrap();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["Banks"]["A"]["Balance"], -100);
        assert_eq!(json["Banks"]["A"]["Accounts"]["1"], -100);
        assert_eq!(json["Banks"]["B"]["Balance"], 100);
        assert!(json["Timestamp"].is_string());
    }
}
