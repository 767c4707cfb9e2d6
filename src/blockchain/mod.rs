// Ledger core
//
// This module contains the UTXO ledger implementation:
// - Identity (keypairs, addresses, signatures)
// - Unspent output set
// - Transactions and input selection
// - Blocks and proof of work
// - The ledger itself, its snapshots and the snapshot store

pub mod block;
pub mod config;
pub mod crypto;
pub mod ledger;
pub mod snapshot;
pub mod storage;
pub mod transaction;
pub mod user;
pub mod utxo;

// Re-export main components for easier access
pub use block::{Block, BlockSummary};
pub use config::LedgerConfig;
pub use crypto::{Address, DigitalSignature, Wallet};
pub use ledger::{FailureKind, Ledger, LedgerError, LedgerStats};
pub use snapshot::LedgerSnapshot;
pub use storage::SnapshotStore;
pub use transaction::{InputRecord, Transaction, TransactionRecord};
pub use user::{User, UserBalance, UserId};
pub use utxo::{OutputId, UnspentOutput, UtxoSet};
