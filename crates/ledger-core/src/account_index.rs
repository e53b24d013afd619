//! Per-bank account map with independently mutable balance cells

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Account number -> balance cell map for one bank
///
/// Structural mutation (inserting a new account) takes this bank's
/// write lock; mutating an existing cell is a lock-free atomic add.
/// Concurrent transfers touching different accounts of the same bank
/// contend only on the brief existence check.
#[derive(Default)]
pub struct AccountIndex {
    accounts: RwLock<HashMap<u32, Arc<AtomicI32>>>,
}

impl AccountIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the balance cell for an account, allocating it at zero if
    /// this is the first time the account is referenced.
    pub fn get_or_create(&self, account: u32) -> Arc<AtomicI32> {
        if let Some(cell) = self.accounts.read().get(&account) {
            return Arc::clone(cell);
        }
        let mut accounts = self.accounts.write();
        Arc::clone(
            accounts
                .entry(account)
                .or_insert_with(|| Arc::new(AtomicI32::new(0))),
        )
    }

    /// Apply a signed delta to an account balance
    pub fn add(&self, account: u32, delta: i32) {
        self.get_or_create(account).fetch_add(delta, Ordering::Relaxed);
    }

    /// Current balance of an account (zero if never touched)
    pub fn balance(&self, account: u32) -> i32 {
        self.accounts
            .read()
            .get(&account)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Visit every account with its current balance
    pub fn for_each(&self, mut f: impl FnMut(u32, i32)) {
        for (account, cell) in self.accounts.read().iter() {
            f(*account, cell.load(Ordering::Relaxed));
        }
    }

    /// Deep copy of all account balances
    pub fn snapshot(&self) -> HashMap<u32, i32> {
        self.accounts
            .read()
            .iter()
            .map(|(account, cell)| (*account, cell.load(Ordering::Relaxed)))
            .collect()
    }

    /// Sum of all account balances, widened to i64
    pub fn balance_sum(&self) -> i64 {
        self.accounts
            .read()
            .values()
            .map(|cell| i64::from(cell.load(Ordering::Relaxed)))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }
}
