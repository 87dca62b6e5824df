use axum::routing::{get, post};
use tracing_subscriber::EnvFilter;

use traffic_store::{AppConfig, StoreError, TableStore};

mod handlers;

use handlers::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppConfig::from_env()?;

    // Serve without a store until one is built; queries answer 503 meanwhile
    let store = match TableStore::open(&cfg.store_path) {
        Ok(store) => Some(store),
        Err(StoreError::StoreUnavailable(path)) => {
            tracing::warn!("no store at {} yet; run build_store then POST /reload", path.display());
            None
        }
        Err(e) => return Err(e.into()),
    };

    let state = AppState::new(cfg.store_path.clone(), store);

    let app = axum::Router::new()
        .route("/health", get(handlers::health))
        .route("/tables", get(handlers::tables))
        .route("/tables/:name", get(handlers::table))
        .route("/filters", get(handlers::filters))
        .route("/reconciliation", get(handlers::reconciliation))
        .route("/segments", get(handlers::segments))
        .route("/hourly", get(handlers::hourly))
        .route("/low-speed", get(handlers::low_speed_table))
        .route("/reload", post(handlers::reload))
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
