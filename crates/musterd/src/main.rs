use anyhow::{Context, Result};
use muster_core::{FaceExtractor, IdentityCache};
use musterd::api::{self, AppState};
use musterd::config::Config;
use musterd::engine::spawn_engine;
use musterd::sidecar::SidecarExtractor;
use musterd::store::{self, SqliteStore, Store};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("musterd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        threshold = config.match_threshold,
        cooldown_secs = config.cooldown_secs,
        db = %config.db_path.display(),
        "configuration loaded"
    );

    // Store and cache must be ready before serving (fail-fast).
    let sqlite = SqliteStore::open(&config.db_path)
        .await
        .context("persistent store unavailable")?;
    let store: Arc<dyn Store> = Arc::new(sqlite);
    let cache = Arc::new(IdentityCache::new());
    store::warm_cache(store.as_ref(), &cache)
        .await
        .context("failed to load identities")?;

    let url = config.extractor_url.clone();
    let timeout = config.extractor_timeout();
    let engine = spawn_engine(move || {
        let extractor = SidecarExtractor::new(&url, timeout)?;
        Ok(Box::new(extractor) as Box<dyn FaceExtractor>)
    })
    .await
    .context("failed to start extraction engine")?;

    let state = AppState::new(store, cache, engine, &config);
    let app = api::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "musterd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("musterd shutting down");
    Ok(())
}
