use actix_web::{web, HttpResponse};

use crate::blockchain::{Block, LedgerSnapshot, LedgerStats, TransactionRecord, UserBalance};

use super::schema::{
    ChainResponse, DifficultyRequest, MineRequest, MineResponse, TransactionRequest,
    TransactionResponse,
};
use super::state::{ApiError, AppState};

/// Data structure for the shared ledger state
pub type LedgerData = web::Data<AppState>;

/// List users
///
/// Returns every registered user with address and balance
#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "Users retrieved successfully", body = Vec<UserBalance>)
    )
)]
pub async fn get_users(state: LedgerData) -> Result<HttpResponse, ApiError> {
    let balances = state.read(|ledger| ledger.balances())?;
    Ok(HttpResponse::Ok().json(balances))
}

/// Register a user
///
/// Creates a user with a fresh keypair and a zero balance
#[utoipa::path(
    post,
    path = "/api/v1/users",
    responses(
        (status = 201, description = "User registered successfully", body = UserBalance)
    )
)]
pub async fn create_user(state: LedgerData) -> Result<HttpResponse, ApiError> {
    let user = state.update(|ledger| {
        let user = ledger.register_user();
        Ok(UserBalance {
            id: user.id(),
            address: user.address().clone(),
            balance: 0.0,
        })
    })?;

    Ok(HttpResponse::Created().json(user))
}

/// Get a user
///
/// Returns a user's address and balance
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(
        ("id" = u64, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User retrieved successfully", body = UserBalance),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn get_user(state: LedgerData, id: web::Path<u64>) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    let balance = state.read(|ledger| {
        ledger.user(id).map(|user| UserBalance {
            id,
            address: user.address().clone(),
            balance: ledger.balance_of(user.address()),
        })
    })?;

    match balance {
        Some(balance) => Ok(HttpResponse::Ok().json(balance)),
        None => Err(ApiError::NotFound(format!("user {}", id))),
    }
}

/// Submit a transfer
///
/// Validates, signs and adds a transfer to the pending pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Transaction rejected"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn new_transaction(
    state: LedgerData,
    request: web::Json<TransactionRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    let transaction = state.update(|ledger| {
        ledger.submit(request.sender, request.receiver, request.amount)
    })?;

    Ok(HttpResponse::Created().json(TransactionResponse {
        message: "Transaction added to the pending pool".to_string(),
        transaction,
    }))
}

/// Get all pending transactions
///
/// Returns transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<TransactionRecord>)
    )
)]
pub async fn get_pending_transactions(state: LedgerData) -> Result<HttpResponse, ApiError> {
    let pending = state.read(|ledger| ledger.pending_records())?;
    Ok(HttpResponse::Ok().json(pending))
}

/// Get the transaction log
///
/// Returns every accepted transaction, including coinbase transactions
#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    responses(
        (status = 200, description = "Transactions retrieved successfully", body = Vec<TransactionRecord>)
    )
)]
pub async fn get_transactions(state: LedgerData) -> Result<HttpResponse, ApiError> {
    let transactions = state.read(|ledger| ledger.transactions().to_vec())?;
    Ok(HttpResponse::Ok().json(transactions))
}

/// Mine a new block
///
/// Seals the pending pool into a block; the proof of work runs on the
/// blocking thread pool
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 404, description = "Unknown miner"),
        (status = 409, description = "Block cannot be mined")
    )
)]
pub async fn mine_block(
    state: LedgerData,
    request: web::Json<MineRequest>,
) -> Result<HttpResponse, ApiError> {
    let miner = request.miner;
    let worker = state.clone();

    let block = web::block(move || worker.update(|ledger| ledger.mine(miner)))
        .await
        .map_err(|_| ApiError::Blocking)??;

    Ok(HttpResponse::Ok().json(MineResponse {
        message: "New Block Mined".to_string(),
        block,
    }))
}

/// Get the chain
///
/// Returns block summaries and the chain's validity
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(state: LedgerData) -> Result<HttpResponse, ApiError> {
    let response = state.read(|ledger| ChainResponse {
        length: ledger.chain().len(),
        chain: ledger.chain_summaries(),
        is_valid: ledger.is_valid(),
    })?;

    Ok(HttpResponse::Ok().json(response))
}

/// Get a block
///
/// Returns a block with its full transaction records
#[utoipa::path(
    get,
    path = "/api/v1/chain/{index}",
    params(
        ("index" = u64, Path, description = "Block index")
    ),
    responses(
        (status = 200, description = "Block retrieved successfully", body = Block),
        (status = 404, description = "No such block")
    )
)]
pub async fn get_block(state: LedgerData, index: web::Path<u64>) -> Result<HttpResponse, ApiError> {
    let index = index.into_inner();
    match state.read(|ledger| ledger.block(index).cloned())? {
        Some(block) => Ok(HttpResponse::Ok().json(block)),
        None => Err(ApiError::NotFound(format!("block {}", index))),
    }
}

/// Check if the chain is valid
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool)
    )
)]
pub async fn validate_chain(state: LedgerData) -> Result<HttpResponse, ApiError> {
    let is_valid = state.read(|ledger| ledger.is_valid())?;
    Ok(HttpResponse::Ok().json(is_valid))
}

/// Get ledger statistics
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    responses(
        (status = 200, description = "Statistics retrieved successfully", body = LedgerStats)
    )
)]
pub async fn get_stats(state: LedgerData) -> Result<HttpResponse, ApiError> {
    let stats = state.read(|ledger| ledger.stats())?;
    Ok(HttpResponse::Ok().json(stats))
}

/// Change the mining difficulty
#[utoipa::path(
    put,
    path = "/api/v1/difficulty",
    request_body = DifficultyRequest,
    responses(
        (status = 200, description = "Difficulty changed", body = LedgerStats)
    )
)]
pub async fn set_difficulty(
    state: LedgerData,
    request: web::Json<DifficultyRequest>,
) -> Result<HttpResponse, ApiError> {
    let stats = state.update(|ledger| {
        ledger.set_difficulty(request.difficulty);
        Ok(ledger.stats())
    })?;

    Ok(HttpResponse::Ok().json(stats))
}

/// Export a snapshot
///
/// Returns the whole ledger as a bincode blob
#[utoipa::path(
    get,
    path = "/api/v1/snapshot",
    responses(
        (status = 200, description = "Snapshot blob", body = Vec<u8>, content_type = "application/octet-stream")
    )
)]
pub async fn export_snapshot(state: LedgerData) -> Result<HttpResponse, ApiError> {
    let bytes = state.read(|ledger| ledger.export_state().to_bytes())??;

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(bytes))
}

/// Import a snapshot
///
/// Replaces the ledger with a previously exported blob
#[utoipa::path(
    post,
    path = "/api/v1/snapshot",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Snapshot imported", body = LedgerStats),
        (status = 400, description = "Snapshot rejected")
    )
)]
pub async fn import_snapshot(state: LedgerData, body: web::Bytes) -> Result<HttpResponse, ApiError> {
    let snapshot = LedgerSnapshot::from_bytes(&body)?;
    let stats = state.update(|ledger| {
        ledger.import_state(snapshot)?;
        Ok(ledger.stats())
    })?;

    Ok(HttpResponse::Ok().json(stats))
}
