use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Block, BlockSummary, TransactionRecord};

/// Request for the transaction endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// Id of the sending user
    pub sender: u64,

    /// Id of the receiving user
    pub receiver: u64,

    /// The amount to transfer; the ledger fee is added on top
    pub amount: f64,
}

/// Response for the transaction endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,

    /// The accepted transaction, now pending
    pub transaction: TransactionRecord,
}

/// Request for the mine endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// Id of the user receiving the reward
    pub miner: u64,
}

/// Response for the mine endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the chain endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// Summaries of the blocks in the chain
    pub chain: Vec<BlockSummary>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the difficulty endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DifficultyRequest {
    /// Leading zero hex digits required from now on
    pub difficulty: u8,
}
