//! Durable balance store
//!
//! Sled-backed persistence for the ledger: the single consumer of the
//! backup channels, and the one-shot read source for the initial load
//! at startup. Records are upserted by key, so every backup tick
//! simply overwrites with the authoritative current value.

use anyhow::Result;
use crossbeam_channel::Receiver;
use ledger_core::{AccountRecord, BackupChannels, BankRecord};
use sled::Db;
use std::path::Path;

/// Persistent store for bank and account balances
///
/// Two trees: `banks` keyed by bank id, `accounts` keyed by
/// (bank id, account number). Values are bincode-encoded records.
pub struct LedgerStore {
    db: Db,
    banks: sled::Tree,
    accounts: sled::Tree,
}

impl LedgerStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(&path)?;
        let banks = db.open_tree("banks")?;
        let accounts = db.open_tree("accounts")?;

        tracing::info!("opened ledger store at {:?}", path.as_ref());

        Ok(Self { db, banks, accounts })
    }

    /// Upsert one bank balance, keyed by id
    pub fn upsert_bank(&self, record: &BankRecord) -> Result<()> {
        let value = bincode::serialize(record)?;
        self.banks.insert(record.id.to_be_bytes(), value)?;
        Ok(())
    }

    /// Upsert one account balance, keyed by (bank id, account)
    pub fn upsert_account(&self, record: &AccountRecord) -> Result<()> {
        let mut key = [0u8; 6];
        key[..2].copy_from_slice(&record.bank_id.to_be_bytes());
        key[2..].copy_from_slice(&record.account.to_be_bytes());
        let value = bincode::serialize(record)?;
        self.accounts.insert(key, value)?;
        Ok(())
    }

    /// One-shot read of all persisted bank balances
    pub fn load_banks(&self) -> Result<Vec<BankRecord>> {
        let mut records = Vec::new();
        for entry in self.banks.iter() {
            let (_, value) = entry?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    /// One-shot read of all persisted account balances
    pub fn load_accounts(&self) -> Result<Vec<AccountRecord>> {
        let mut records = Vec::new();
        for entry in self.accounts.iter() {
            let (_, value) = entry?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Drain the backup channels until both disconnect.
    ///
    /// Runs on a dedicated thread; a failed write is logged and
    /// dropped, since the next tick re-sends the full current value.
    pub fn run(&self, channels: BackupChannels) {
        let BackupChannels { banks, accounts } = channels;
        loop {
            crossbeam_channel::select! {
                recv(banks) -> record => match record {
                    Ok(record) => {
                        if let Err(err) = self.upsert_bank(&record) {
                            tracing::warn!(%err, bank = record.name.as_str(), "bank backup write failed");
                        }
                    }
                    Err(_) => {
                        self.drain_accounts(&accounts);
                        break;
                    }
                },
                recv(accounts) -> record => match record {
                    Ok(record) => {
                        if let Err(err) = self.upsert_account(&record) {
                            tracing::warn!(%err, bank = record.bank.as_str(), account = record.account, "account backup write failed");
                        }
                    }
                    Err(_) => {
                        self.drain_banks(&banks);
                        break;
                    }
                },
            }
        }
        if let Err(err) = self.flush() {
            tracing::error!(%err, "final store flush failed");
        }
        tracing::info!("ledger store consumer stopped");
    }

    fn drain_banks(&self, banks: &Receiver<BankRecord>) {
        for record in banks.try_iter() {
            if let Err(err) = self.upsert_bank(&record) {
                tracing::warn!(%err, "bank backup write failed");
            }
        }
    }

    fn drain_accounts(&self, accounts: &Receiver<AccountRecord>) {
        for record in accounts.try_iter() {
            if let Err(err) = self.upsert_account(&record) {
                tracing::warn!(%err, "account backup write failed");
            }
        }
    }
}
