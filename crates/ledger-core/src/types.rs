//! Wire and channel types shared across the ledger

use serde::{Deserialize, Serialize};

/// One side of a transfer: a bank and an account within it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Party {
    /// Bank name
    pub name: String,
    /// Account number within the bank
    pub account: u32,
}

/// A payment moving through the clearing network
///
/// The amount is subtracted from the sender's bank and account
/// balances and added to the receiver's, so the network-wide sum
/// of balances is conserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transfer {
    pub sender: Party,
    pub receiver: Party,
    /// Signed amount in minor units
    pub amount: i32,
}

/// Full current bank balance, emitted on every backup tick
///
/// Backups carry the authoritative current value rather than a delta,
/// so a dropped record self-heals on the next tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankRecord {
    pub id: u16,
    pub name: String,
    pub balance: i64,
}

/// Full current account balance, emitted on account backup ticks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub bank_id: u16,
    pub bank: String,
    pub account: u32,
    pub balance: i32,
}
