use std::sync::Arc;

use playnet_messaging::services::PgRelationships;
use playnet_messaging::store::PgMessageStore;
use playnet_messaging::{config, db, error, logging, routes, state::AppState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let pool = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
    db::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    let state = AppState::new(
        Arc::new(PgMessageStore::new(pool.clone())),
        Arc::new(PgRelationships::new(pool)),
        Arc::clone(&cfg),
    );
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.port))
        .await
        .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?;
    info!(port = cfg.port, "messaging service listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(format!("serve: {e}")))?;
    Ok(())
}
