use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::block::Block;
use super::config::LedgerConfig;
use super::transaction::{Transaction, TransactionRecord};
use super::user::User;
use super::utxo::UtxoSet;

/// Errors that can occur while encoding or decoding a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Binary encoding error: {0}")]
    BinaryError(#[from] bincode::Error),

    #[error("JSON encoding error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Structural dump of every ledger field.
///
/// Produced by `Ledger::export_state` and consumed by `Ledger::import_state`.
/// Contains the users' private keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub config: LedgerConfig,
    pub users: Vec<User>,
    pub chain: Vec<Block>,
    pub utxos: UtxoSet,
    pub transactions: Vec<TransactionRecord>,
    pub pending: Vec<Transaction>,
    pub rewards: Vec<f64>,
    pub fee_history: Vec<f64>,
    pub next_user_id: u64,
    pub next_transaction_id: u64,
    pub next_block_index: u64,
}

impl LedgerSnapshot {
    /// Encodes the snapshot as a transportable bincode blob
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Human readable dump
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::blockchain::config::LedgerConfig;
    use crate::blockchain::Ledger;

    use super::*;

    fn busy_ledger() -> Ledger {
        let mut ledger = Ledger::new(LedgerConfig::default().with_difficulty(1)).unwrap();
        let genesis = ledger.users()[0].id();
        let bob = ledger.register_user().id();

        ledger.submit(genesis, bob, 100.0).unwrap();
        ledger.mine(bob).unwrap();
        ledger.submit(bob, genesis, 1.5).unwrap();
        ledger
    }

    #[test]
    fn test_binary_round_trip() {
        let snapshot = busy_ledger().export_state();

        let bytes = snapshot.to_bytes().unwrap();
        let decoded = LedgerSnapshot::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.chain, snapshot.chain);
        assert_eq!(decoded.utxos, snapshot.utxos);
        assert_eq!(decoded.pending, snapshot.pending);
        assert_eq!(decoded.transactions, snapshot.transactions);
        assert_eq!(decoded.users.len(), 2);
        assert_eq!(decoded.users[1].address(), snapshot.users[1].address());
    }

    #[test]
    fn test_json_round_trip() {
        let snapshot = busy_ledger().export_state();

        let json = snapshot.to_json().unwrap();
        let decoded = LedgerSnapshot::from_json(&json).unwrap();

        assert_eq!(decoded.chain, snapshot.chain);
        assert_eq!(decoded.next_transaction_id, snapshot.next_transaction_id);
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        assert!(LedgerSnapshot::from_bytes(&[1, 2, 3]).is_err());
    }
}
