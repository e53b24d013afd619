//! Top-level concurrent map of banks

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU16, Ordering};
use std::sync::Arc;

use crate::account_index::AccountIndex;
use crate::types::{AccountRecord, BankRecord};

/// One participating bank: net balance against the clearing
/// intermediary plus its account sub-ledger
///
/// Positive balance means the intermediary owes the bank, negative
/// means the bank owes the intermediary.
pub struct Bank {
    id: u16,
    name: String,
    balance: AtomicI64,
    accounts: AccountIndex,
}

impl Bank {
    fn new(id: u16, name: String) -> Self {
        Self {
            id,
            name,
            balance: AtomicI64::new(0),
            accounts: AccountIndex::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> i64 {
        self.balance.load(Ordering::Relaxed)
    }

    /// Apply a signed delta to the bank's net balance
    pub fn add(&self, delta: i64) {
        self.balance.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn accounts(&self) -> &AccountIndex {
        &self.accounts
    }
}

#[derive(Default)]
struct BankTable {
    by_name: HashMap<String, Arc<Bank>>,
    /// Bank names in insertion order, consumed by the backup ring
    names: Vec<String>,
}

/// Shared read guard over the bank table
///
/// Held by `update_balances` across both legs of a transfer so a
/// snapshot capture, which takes the table's write lock, observes
/// whole transfers only.
pub struct ReadPin<'a>(RwLockReadGuard<'a, BankTable>);

impl ReadPin<'_> {
    pub fn bank(&self, name: &str) -> Option<&Arc<Bank>> {
        self.0.by_name.get(name)
    }
}

/// Exclusive guard over the bank table, used for snapshot capture
pub struct ExclusiveGuard<'a>(RwLockWriteGuard<'a, BankTable>);

impl ExclusiveGuard<'_> {
    pub fn banks(&self) -> impl Iterator<Item = (&String, &Arc<Bank>)> {
        self.0.by_name.iter()
    }
}

/// Concurrent store of all bank balances
///
/// Bank creation (a structural map mutation) takes the store-wide
/// write lock briefly on the cold path; the hot path holds only the
/// read lock while atomic adds land. The same write lock is taken by
/// snapshot capture to get a globally consistent view - the one place
/// a short stall is traded for linearizability.
#[derive(Default)]
pub struct BalanceStore {
    banks: RwLock<BankTable>,
    next_id: AtomicU16,
}

impl BalanceStore {
    pub fn new() -> Self {
        Self {
            banks: RwLock::new(BankTable::default()),
            // Serial ids start at 1
            next_id: AtomicU16::new(1),
        }
    }

    /// Get a bank handle by name, creating the bank lazily with a
    /// fresh serial id on first reference.
    pub fn get_or_create(&self, name: &str) -> Arc<Bank> {
        if let Some(bank) = self.banks.read().by_name.get(name) {
            return Arc::clone(bank);
        }
        let mut table = self.banks.write();
        if let Some(bank) = table.by_name.get(name) {
            return Arc::clone(bank);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bank = Arc::new(Bank::new(id, name.to_string()));
        table.by_name.insert(name.to_string(), Arc::clone(&bank));
        table.names.push(name.to_string());
        tracing::debug!(bank = name, id, "created bank");
        bank
    }

    pub fn get(&self, name: &str) -> Option<Arc<Bank>> {
        self.banks.read().by_name.get(name).map(Arc::clone)
    }

    /// Pin the table shared while applying balance deltas
    pub fn read_pin(&self) -> ReadPin<'_> {
        ReadPin(self.banks.read())
    }

    /// Take the store-wide exclusive lock for snapshot capture
    pub fn lock_exclusive(&self) -> ExclusiveGuard<'_> {
        ExclusiveGuard(self.banks.write())
    }

    /// Visit every bank under the shared lock
    pub fn for_each_bank(&self, mut f: impl FnMut(&Arc<Bank>)) {
        for bank in self.banks.read().by_name.values() {
            f(bank);
        }
    }

    /// Bank names appended since `start`, in insertion order
    pub fn bank_names_from(&self, start: usize) -> Vec<String> {
        let table = self.banks.read();
        if start >= table.names.len() {
            return Vec::new();
        }
        table.names[start..].to_vec()
    }

    pub fn bank_count(&self) -> usize {
        self.banks.read().by_name.len()
    }

    /// Restore a bank from the durable store during initial load,
    /// preserving its persisted id and balance.
    pub fn restore_bank(&self, record: &BankRecord) {
        let mut table = self.banks.write();
        if !table.by_name.contains_key(&record.name) {
            let bank = Arc::new(Bank::new(record.id, record.name.clone()));
            table.by_name.insert(record.name.clone(), bank);
            table.names.push(record.name.clone());
            // Keep lazily assigned ids above every restored one
            self.next_id
                .fetch_max(record.id.saturating_add(1), Ordering::Relaxed);
        }
        let bank = &table.by_name[&record.name];
        bank.balance.store(record.balance, Ordering::Relaxed);
    }

    /// Restore one account balance during initial load
    pub fn restore_account(&self, record: &AccountRecord) {
        let bank = self.get_or_create(&record.bank);
        bank.accounts()
            .get_or_create(record.account)
            .store(record.balance, Ordering::Relaxed);
    }
}
