use actix_web::web;

use super::handlers;

/// Largest snapshot blob accepted by the import endpoint
const MAX_SNAPSHOT_BYTES: usize = 64 * 1024 * 1024;

/// Configures the API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .app_data(web::PayloadConfig::new(MAX_SNAPSHOT_BYTES))
            .route("/users", web::get().to(handlers::get_users))
            .route("/users", web::post().to(handlers::create_user))
            .route("/users/{id}", web::get().to(handlers::get_user))
            .route("/transactions", web::get().to(handlers::get_transactions))
            .route("/transactions", web::post().to(handlers::new_transaction))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/chain/{index}", web::get().to(handlers::get_block))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/stats", web::get().to(handlers::get_stats))
            .route("/difficulty", web::put().to(handlers::set_difficulty))
            .route("/snapshot", web::get().to(handlers::export_snapshot))
            .route("/snapshot", web::post().to(handlers::import_snapshot)),
    );
}
