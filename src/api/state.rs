use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::warn;
use thiserror::Error;

use std::sync::{Mutex, MutexGuard};

use crate::blockchain::ledger::FailureKind;
use crate::blockchain::snapshot::SnapshotError;
use crate::blockchain::{Ledger, LedgerError, SnapshotStore};

/// Name under which the running ledger is persisted
pub const CURRENT_SNAPSHOT: &str = "current";

/// Errors returned by the API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Ledger(#[from] LedgerError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ledger state is unavailable")]
    Poisoned,

    #[error("Background task failed")]
    Blocking,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(LedgerError::UnknownUser(_)) | ApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Ledger(err) => match err.kind() {
                FailureKind::NoUsers | FailureKind::StaleInput => StatusCode::CONFLICT,
                FailureKind::InsufficientFunds | FailureKind::InvalidSignature => {
                    StatusCode::BAD_REQUEST
                }
                FailureKind::Other => match err {
                    LedgerError::TransactionError(_) | LedgerError::InvalidSnapshot(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                },
            },
            ApiError::Snapshot(_) => StatusCode::BAD_REQUEST,
            ApiError::Poisoned | ApiError::Blocking => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let kind = match self {
            ApiError::Ledger(err) => Some(format!("{:?}", err.kind())),
            _ => None,
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string(),
            "kind": kind,
        }))
    }
}

/// Shared application state: the ledger behind a mutex, which serializes
/// every call, plus the optional snapshot store
pub struct AppState {
    ledger: Mutex<Ledger>,
    store: Option<SnapshotStore>,
}

impl AppState {
    pub fn new(ledger: Ledger, store: Option<SnapshotStore>) -> Self {
        AppState {
            ledger: Mutex::new(ledger),
            store,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>, ApiError> {
        self.ledger.lock().map_err(|_| ApiError::Poisoned)
    }

    /// Runs a read-only query
    pub fn read<T>(&self, query: impl FnOnce(&Ledger) -> T) -> Result<T, ApiError> {
        let ledger = self.lock()?;
        Ok(query(&ledger))
    }

    /// Runs a mutating operation and persists the ledger if it succeeds
    pub fn update<T>(
        &self,
        operation: impl FnOnce(&mut Ledger) -> Result<T, LedgerError>,
    ) -> Result<T, ApiError> {
        let mut ledger = self.lock()?;
        let value = operation(&mut ledger)?;
        self.persist(&ledger);
        Ok(value)
    }

    fn persist(&self, ledger: &Ledger) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(CURRENT_SNAPSHOT, &ledger.export_state()) {
                warn!("Failed to persist ledger snapshot: {}", err);
            }
        }
    }
}
