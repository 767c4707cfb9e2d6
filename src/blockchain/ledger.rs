use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::HashSet;

use super::block::{Block, BlockSummary, GENESIS_PREVIOUS_HASH};
use super::config::LedgerConfig;
use super::crypto::Address;
use super::snapshot::LedgerSnapshot;
use super::transaction::{Transaction, TransactionError, TransactionRecord, TransactionStatus};
use super::user::{User, UserBalance, UserId};
use super::utxo::{OutputId, UnspentOutput, UtxoError, UtxoSet};

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("No registered user can receive the mining reward")]
    NoUsers,

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Output set error: {0}")]
    UtxoError(#[from] UtxoError),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] serde_json::Error),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Coarse failure taxonomy reported to callers of `submit` and `mine`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InsufficientFunds,
    InvalidSignature,
    StaleInput,
    NoUsers,
    Other,
}

impl LedgerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LedgerError::NoUsers => FailureKind::NoUsers,
            LedgerError::TransactionError(TransactionError::InsufficientFunds { .. }) => {
                FailureKind::InsufficientFunds
            }
            LedgerError::TransactionError(TransactionError::InvalidSignature) => {
                FailureKind::InvalidSignature
            }
            LedgerError::UtxoError(UtxoError::StaleInput(_))
            | LedgerError::TransactionError(TransactionError::UtxoError(UtxoError::StaleInput(_))) => {
                FailureKind::StaleInput
            }
            _ => FailureKind::Other,
        }
    }
}

/// Aggregate figures shown to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LedgerStats {
    pub users: usize,
    pub blocks: usize,
    pub transactions: usize,
    pub total_rewards: f64,
    pub pending: usize,
    pub difficulty: u8,
}

/// The ledger: users, unspent outputs, pending pool and chain.
///
/// All mutation goes through `register_user`, `submit`, `mine` and
/// `import_state`. Callers must serialize those calls.
#[derive(Debug, Clone)]
pub struct Ledger {
    config: LedgerConfig,
    users: Vec<User>,
    utxos: UtxoSet,
    /// Every accepted transfer and every coinbase, in acceptance order
    transactions: Vec<TransactionRecord>,
    /// Prepared transfers waiting for the next block, in submission order
    pending: Vec<Transaction>,
    chain: Vec<Block>,
    rewards: Vec<f64>,
    fee_history: Vec<f64>,
    next_user_id: u64,
    next_transaction_id: u64,
    next_block_index: u64,
}

impl Ledger {
    /// Creates a ledger and runs genesis: the first user receives the
    /// configured initial supply in block 0
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let mut ledger = Ledger {
            config,
            users: Vec::new(),
            utxos: UtxoSet::new(),
            transactions: Vec::new(),
            pending: Vec::new(),
            chain: Vec::new(),
            rewards: Vec::new(),
            fee_history: Vec::new(),
            next_user_id: 0,
            next_transaction_id: 0,
            next_block_index: 0,
        };

        ledger.create_genesis_block()?;
        Ok(ledger)
    }

    /// Mints the initial supply straight into the output set. Skips the
    /// pending pool and the proof of work.
    fn create_genesis_block(&mut self) -> Result<(), LedgerError> {
        let receiver = self.register_user().address().clone();

        let mut coinbase = Transaction::new_coinbase(
            self.next_transaction_id,
            receiver,
            self.config.initial_supply,
        )?;
        coinbase.apply(&mut self.utxos)?;

        let record = coinbase.to_record();
        let block = Block::new(
            0,
            vec![record.clone()],
            GENESIS_PREVIOUS_HASH.to_string(),
            None,
        )?;

        info!(
            "Genesis block {} minted {} to {}",
            block.hash, self.config.initial_supply, record.receiver
        );

        self.next_transaction_id += 1;
        self.next_block_index = 1;
        self.transactions.push(record);
        self.chain.push(block);

        Ok(())
    }

    /// Registers a new user with a fresh keypair
    pub fn register_user(&mut self) -> &User {
        let user = User::new(self.next_user_id);
        self.next_user_id += 1;

        info!("Registered user {} with address {}", user.id(), user.address());

        let index = self.users.len();
        self.users.push(user);
        &self.users[index]
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|user| user.id() == id)
    }

    fn require_user(&self, id: UserId) -> Result<&User, LedgerError> {
        self.user(id).ok_or(LedgerError::UnknownUser(id))
    }

    fn reserved_outputs(&self) -> HashSet<OutputId> {
        self.pending
            .iter()
            .flat_map(|transaction| transaction.consumed())
            .collect()
    }

    /// Live outputs of `address` not already claimed by a pending transfer
    pub fn spendable_outputs(&self, address: &Address) -> Vec<UnspentOutput> {
        let reserved = self.reserved_outputs();
        self.utxos
            .outputs_of(address)
            .into_iter()
            .filter(|output| !reserved.contains(&output.id))
            .collect()
    }

    /// Validates, signs and queues a transfer of `amount` from `sender` to
    /// `receiver`. A rejected transfer leaves the ledger unchanged.
    pub fn submit(
        &mut self,
        sender: UserId,
        receiver: UserId,
        amount: f64,
    ) -> Result<TransactionRecord, LedgerError> {
        let sender = self.require_user(sender)?;
        let receiver = self.require_user(receiver)?.address().clone();
        let sender_id = sender.id();

        let candidates = self.spendable_outputs(sender.address());
        let transaction = match Transaction::prepare_transfer(
            self.next_transaction_id,
            sender,
            receiver,
            amount,
            self.config.transaction_fee,
            candidates,
        ) {
            Ok(transaction) => transaction,
            Err(err) => {
                warn!("Rejected transfer of {} from user {}: {}", amount, sender_id, err);
                return Err(err.into());
            }
        };

        let record = transaction.to_record();
        self.next_transaction_id += 1;
        self.transactions.push(record.clone());
        self.pending.push(transaction);

        info!(
            "Transaction {} of {} from user {} added to the pending pool",
            record.txid, record.amount, sender_id
        );

        Ok(record)
    }

    /// Sum of the fees carried by the pending pool
    pub fn pending_fees(&self) -> f64 {
        self.pending
            .iter()
            .filter(|transaction| !transaction.is_coinbase())
            .map(|transaction| transaction.fee)
            .sum()
    }

    /// Seals the pending pool into a new block mined by `miner`.
    ///
    /// The miner is paid the base reward plus every pending fee. The commit is
    /// staged on a copy of the output set before the nonce search, so a stale
    /// input fails the call without touching the ledger.
    pub fn mine(&mut self, miner: UserId) -> Result<Block, LedgerError> {
        if self.users.is_empty() {
            return Err(LedgerError::NoUsers);
        }
        let miner_address = self.require_user(miner)?.address().clone();

        let reward = self.config.mining_reward + self.pending_fees();
        let mut coinbase =
            Transaction::new_coinbase(self.next_transaction_id, miner_address.clone(), reward)?;

        let mut utxos = self.utxos.clone();
        let mut committed = self.pending.clone();
        let mut collected = 0.0;

        coinbase.apply(&mut utxos)?;
        for transaction in committed.iter_mut() {
            match transaction.apply(&mut utxos) {
                Ok(fee) => collected += fee,
                Err(err) => {
                    warn!(
                        "Cannot commit pending transaction {}: {}",
                        transaction.sequence_id, err
                    );
                    return Err(err.into());
                }
            }
        }

        let mut records = Vec::with_capacity(committed.len() + 1);
        records.push(coinbase.to_record());
        records.extend(committed.iter().map(Transaction::to_record));

        let previous_hash = self
            .chain
            .last()
            .map(|block| block.hash.clone())
            .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());

        let mut block = Block::new(self.next_block_index, records, previous_hash, Some(reward))?;
        let attempts = block.mine(self.config.difficulty)?;

        self.utxos = utxos;
        self.transactions.push(coinbase.to_record());
        self.chain.push(block.clone());
        self.rewards.push(reward);
        self.fee_history.push(collected);
        self.pending.clear();
        self.next_transaction_id += 1;
        self.next_block_index += 1;

        info!(
            "Block {} mined by {} in {:.2} seconds after {} nonces: {}",
            block.index,
            miner_address,
            block.mining_time.unwrap_or_default(),
            attempts,
            block.hash
        );

        Ok(block)
    }

    /// Live balance of an address
    pub fn balance_of(&self, address: &Address) -> f64 {
        self.utxos.balance_of(address)
    }

    /// Every registered user with address and balance
    pub fn balances(&self) -> Vec<UserBalance> {
        self.users
            .iter()
            .map(|user| UserBalance {
                id: user.id(),
                address: user.address().clone(),
                balance: self.utxos.balance_of(user.address()),
            })
            .collect()
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn block(&self, index: u64) -> Option<&Block> {
        self.chain.iter().find(|block| block.index == index)
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    pub fn chain_summaries(&self) -> Vec<BlockSummary> {
        self.chain.iter().map(Block::summary).collect()
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn pending_records(&self) -> Vec<TransactionRecord> {
        self.pending.iter().map(Transaction::to_record).collect()
    }

    pub fn transactions(&self) -> &[TransactionRecord] {
        &self.transactions
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    pub fn fee_history(&self) -> &[f64] {
        &self.fee_history
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn difficulty(&self) -> u8 {
        self.config.difficulty
    }

    /// Changes the difficulty required of blocks mined from now on
    pub fn set_difficulty(&mut self, difficulty: u8) {
        info!("Difficulty changed from {} to {}", self.config.difficulty, difficulty);
        self.config.difficulty = difficulty;
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            users: self.users.len(),
            blocks: self.chain.len(),
            transactions: self.transactions.len(),
            total_rewards: self.rewards.iter().sum(),
            pending: self.pending.len(),
            difficulty: self.config.difficulty,
        }
    }

    /// Checks hashes and links of the whole chain
    pub fn is_valid(&self) -> bool {
        validate_chain(&self.chain).is_ok()
    }

    /// Full structural snapshot of the ledger
    pub fn export_state(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            config: self.config.clone(),
            users: self.users.clone(),
            chain: self.chain.clone(),
            utxos: self.utxos.clone(),
            transactions: self.transactions.clone(),
            pending: self.pending.clone(),
            rewards: self.rewards.clone(),
            fee_history: self.fee_history.clone(),
            next_user_id: self.next_user_id,
            next_transaction_id: self.next_transaction_id,
            next_block_index: self.next_block_index,
        }
    }

    /// Replaces this ledger with a snapshot. An inconsistent snapshot is
    /// rejected and the current state is kept.
    pub fn import_state(&mut self, snapshot: LedgerSnapshot) -> Result<(), LedgerError> {
        *self = Ledger::from_snapshot(snapshot)?;
        info!(
            "Imported ledger with {} blocks and {} users",
            self.chain.len(),
            self.users.len()
        );
        Ok(())
    }

    /// Builds a ledger from a snapshot after checking its consistency
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        validate_chain(&snapshot.chain).map_err(LedgerError::InvalidSnapshot)?;
        validate_snapshot(&snapshot).map_err(LedgerError::InvalidSnapshot)?;

        Ok(Ledger {
            config: snapshot.config,
            users: snapshot.users,
            utxos: snapshot.utxos,
            transactions: snapshot.transactions,
            pending: snapshot.pending,
            chain: snapshot.chain,
            rewards: snapshot.rewards,
            fee_history: snapshot.fee_history,
            next_user_id: snapshot.next_user_id,
            next_transaction_id: snapshot.next_transaction_id,
            next_block_index: snapshot.next_block_index,
        })
    }
}

fn validate_chain(chain: &[Block]) -> Result<(), String> {
    let genesis = chain.first().ok_or("chain is empty")?;
    if genesis.index != 0 || genesis.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err("first block is not a genesis block".to_string());
    }
    if genesis.transactions.len() != 1 {
        return Err("genesis block must hold exactly one transaction".to_string());
    }

    for (position, block) in chain.iter().enumerate() {
        if block.index != position as u64 {
            return Err(format!("block at position {} has index {}", position, block.index));
        }
        if !block.has_valid_hash() {
            return Err(format!("block {} does not match its hash", block.index));
        }
        if !block.transactions.first().map_or(false, TransactionRecord::is_coinbase) {
            return Err(format!("block {} does not start with a coinbase", block.index));
        }
        if position > 0 && block.previous_hash != chain[position - 1].hash {
            return Err(format!("block {} is not linked to its predecessor", block.index));
        }
    }

    Ok(())
}

fn validate_snapshot(snapshot: &LedgerSnapshot) -> Result<(), String> {
    if snapshot.chain.len() as u64 != snapshot.next_block_index {
        return Err("block counter does not match the chain".to_string());
    }
    let mined = snapshot.chain.len() - 1;
    if snapshot.rewards.len() != mined || snapshot.fee_history.len() != mined {
        return Err("reward history does not match the chain".to_string());
    }
    if snapshot.users.is_empty() {
        return Err("snapshot has no users".to_string());
    }

    let mut ids = HashSet::new();
    for user in &snapshot.users {
        if user.id() >= snapshot.next_user_id || !ids.insert(user.id()) {
            return Err(format!("user id {} is duplicated or ahead of the counter", user.id()));
        }
    }

    if let Some(record) = snapshot
        .transactions
        .iter()
        .find(|record| record.sequence_id >= snapshot.next_transaction_id)
    {
        return Err(format!(
            "transaction {} is ahead of the counter",
            record.sequence_id
        ));
    }

    let mut consumed = Vec::new();
    for transaction in &snapshot.pending {
        let sender = transaction
            .sender
            .as_ref()
            .and_then(|address| snapshot.users.iter().find(|user| user.address() == address))
            .ok_or_else(|| {
                format!("pending transaction {} has no registered sender", transaction.sequence_id)
            })?;

        if transaction.status != TransactionStatus::Prepared {
            return Err(format!("pending transaction {} is not prepared", transaction.sequence_id));
        }
        let txid = transaction.compute_txid().map_err(|e| e.to_string())?;
        if transaction.txid.as_deref() != Some(txid.as_str())
            || !transaction.verify_signature(sender.public_key())
        {
            return Err(format!(
                "pending transaction {} has a bad id or signature",
                transaction.sequence_id
            ));
        }
        consumed.extend(transaction.consumed());
    }
    snapshot
        .utxos
        .check_spendable(&consumed)
        .map_err(|e| format!("pending pool cannot be committed: {}", e))?;

    Ok(())
}
