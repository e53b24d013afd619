//! Daemon Configuration

use serde::{Deserialize, Serialize};

/// Clearing daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// HTTP bind address
    pub listen_addr: String,
    /// Sled data directory
    pub data_dir: String,
    /// Interval between bank-balance backup flushes, in milliseconds
    pub backup_interval_ms: u64,
    /// Interval between status log lines, in seconds
    pub status_interval_secs: u64,
    /// Include per-account balances in the status log
    pub status_with_accounts: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8090".to_string(),
            data_dir: "ledger-data".to_string(),
            backup_interval_ms: ledger_core::DEFAULT_BACKUP_INTERVAL_MS,
            status_interval_secs: 5,
            status_with_accounts: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_feed_the_cli() {
        // Clap arg defaults are built from this impl; keep it sane.
        let config = DaemonConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8090");
        assert_eq!(
            config.backup_interval_ms,
            ledger_core::DEFAULT_BACKUP_INTERVAL_MS
        );
        assert!(!config.status_with_accounts);
    }
}
