// API module
//
// REST surface over the ledger: users, transfers, mining, chain queries and
// snapshots

pub mod handlers;
pub mod routes;
pub mod schema;
pub mod state;

// Re-export main components for easier access
pub use routes::configure_routes;
pub use state::{ApiError, AppState};
