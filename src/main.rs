use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use utxo_ledger::api::{self, AppState};
use utxo_ledger::blockchain::{self, Ledger, LedgerConfig, SnapshotStore};

const DEFAULT_DATA_DIR: &str = "data/ledger";
const DEFAULT_BIND: &str = "127.0.0.1:8080";

// Restore the last persisted ledger, or run genesis when there is none
fn initialize_ledger(config: LedgerConfig, store: Option<&SnapshotStore>) -> anyhow::Result<Ledger> {
    if let Some(store) = store {
        match store.latest() {
            Ok(Some(snapshot)) => match Ledger::from_snapshot(snapshot) {
                Ok(ledger) => {
                    info!(
                        "Restored ledger with {} blocks and {} users",
                        ledger.chain().len(),
                        ledger.users().len()
                    );
                    return Ok(ledger);
                }
                Err(err) => warn!("Stored snapshot rejected: {}", err),
            },
            Ok(None) => info!("No stored snapshot found"),
            Err(err) => warn!("Failed to read stored snapshot: {}", err),
        }
    }

    info!("Creating a new ledger with difficulty {}", config.difficulty);
    Ok(Ledger::new(config)?)
}

fn open_store(data_dir: &str) -> Option<SnapshotStore> {
    if let Err(err) = std::fs::create_dir_all(data_dir) {
        warn!("Failed to create data directory {}: {}", data_dir, err);
    }

    match SnapshotStore::new(data_dir) {
        Ok(store) => {
            info!("Opened snapshot store at {}", data_dir);
            Some(store)
        }
        Err(err) => {
            warn!("Failed to open snapshot store: {}", err);
            warn!("Running without persistence");
            None
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_users,
        api::handlers::create_user,
        api::handlers::get_user,
        api::handlers::new_transaction,
        api::handlers::get_transactions,
        api::handlers::get_pending_transactions,
        api::handlers::mine_block,
        api::handlers::get_chain,
        api::handlers::get_block,
        api::handlers::validate_chain,
        api::handlers::get_stats,
        api::handlers::set_difficulty,
        api::handlers::export_snapshot,
        api::handlers::import_snapshot
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::BlockSummary,
            blockchain::TransactionRecord,
            blockchain::InputRecord,
            blockchain::UserBalance,
            blockchain::LedgerStats,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            api::schema::ChainResponse,
            api::schema::TransactionRequest,
            api::schema::TransactionResponse,
            api::schema::MineRequest,
            api::schema::MineResponse,
            api::schema::DifficultyRequest
        )
    ),
    tags(
        (name = "ledger", description = "UTXO ledger API endpoints")
    ),
    info(
        title = "UTXO Ledger API",
        version = "0.1.0",
        description = "A single-node UTXO ledger with proof-of-work mining",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = LedgerConfig::from_env()?;
    let data_dir = std::env::var("LEDGER_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
    let bind = std::env::var("LEDGER_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());

    let store = open_store(&data_dir);
    let ledger = initialize_ledger(config, store.as_ref())?;
    let state = web::Data::new(AppState::new(ledger, store));

    info!("Starting HTTP server at http://{}", bind);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(bind.as_str())?
    .run()
    .await?;

    Ok(())
}
