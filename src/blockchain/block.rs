use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::time::Instant;

use super::crypto::canonical_hash;
use super::transaction::TransactionRecord;

/// Previous-hash value carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

const PROGRESS_INTERVAL: u64 = 100_000;

/// Represents a block in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Committed transactions, coinbase first
    pub transactions: Vec<TransactionRecord>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof of work
    pub nonce: u64,

    /// Seconds spent searching for the nonce; absent for genesis
    pub mining_time: Option<f64>,

    /// Base reward plus fees paid to the miner; absent for genesis
    pub reward: Option<f64>,

    /// Hash of the fields above
    pub hash: String,
}

// Field order here is the canonical block hash order.
#[derive(Serialize)]
struct BlockPreimage<'a> {
    index: u64,
    timestamp: &'a DateTime<Utc>,
    transactions: &'a [TransactionRecord],
    previous_hash: &'a str,
    nonce: u64,
    mining_time: Option<f64>,
    reward: Option<f64>,
}

/// Per-block fields used to render the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BlockSummary {
    pub index: u64,
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub transaction_count: usize,
    pub mining_time: Option<f64>,
    pub reward: Option<f64>,
}

/// Returns true when `hash` starts with at least `difficulty` zero hex digits
pub fn meets_difficulty(hash: &str, difficulty: u8) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

impl Block {
    /// Creates a block with nonce 0 and its initial hash
    pub fn new(
        index: u64,
        transactions: Vec<TransactionRecord>,
        previous_hash: String,
        reward: Option<f64>,
    ) -> Result<Self, serde_json::Error> {
        let mut block = Block {
            index,
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            nonce: 0,
            mining_time: None,
            reward,
            hash: String::new(),
        };
        block.hash = block.calculate_hash()?;

        Ok(block)
    }

    /// Calculates the SHA-256 hash of the block's fields
    pub fn calculate_hash(&self) -> Result<String, serde_json::Error> {
        canonical_hash(&BlockPreimage {
            index: self.index,
            timestamp: &self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
            mining_time: self.mining_time,
            reward: self.reward,
        })
    }

    /// True when the stored hash matches the fields
    pub fn has_valid_hash(&self) -> bool {
        matches!(self.calculate_hash(), Ok(hash) if hash == self.hash)
    }

    /// Searches nonces 0, 1, 2, ... until the hash meets `difficulty`.
    ///
    /// The elapsed search time is recorded with every attempt, so the sealed
    /// hash covers the duration stored in the block. There is no upper bound
    /// on the search. Returns the number of nonces tried after the first.
    pub fn mine(&mut self, difficulty: u8) -> Result<u64, serde_json::Error> {
        let started = Instant::now();

        self.nonce = 0;
        self.mining_time = Some(0.0);
        self.hash = self.calculate_hash()?;

        while !meets_difficulty(&self.hash, difficulty) {
            self.nonce += 1;
            self.mining_time = Some(started.elapsed().as_secs_f64());
            self.hash = self.calculate_hash()?;

            if self.nonce % PROGRESS_INTERVAL == 0 {
                debug!("Block {} still mining at nonce {}", self.index, self.nonce);
            }
        }

        Ok(self.nonce)
    }

    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            index: self.index,
            timestamp: self.timestamp,
            previous_hash: self.previous_hash.clone(),
            hash: self.hash.clone(),
            nonce: self.nonce,
            transaction_count: self.transactions.len(),
            mining_time: self.mining_time,
            reward: self.reward,
        }
    }
}
