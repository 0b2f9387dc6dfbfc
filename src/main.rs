//! readnext binary entrypoint.
//! Boots the Axum HTTP server, wiring the stores, the picker, and the
//! background snapshot loops.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use readnext::api::{self, AppState};
use readnext::config::AppConfig;
use readnext::metrics::Metrics;
use readnext::store::{SourceStore, UserStore};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("readnext=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = AppConfig::load()?;
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("creating data dir {}", cfg.data_dir.display()))?;

    let metrics = Metrics::init(cfg.sync_interval_secs);

    // A corrupt snapshot is fatal here; a missing one just starts empty.
    let users = Arc::new(UserStore::open(cfg.user_snapshot_path())?);
    let sources = Arc::new(SourceStore::open(cfg.source_snapshot_path(), cfg.page_size)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let user_loop = tokio::spawn({
        let users = users.clone();
        let rx = shutdown_rx.clone();
        let every = cfg.sync_interval();
        async move { users.run_sync_loop(every, rx).await }
    });
    let source_loop = tokio::spawn({
        let sources = sources.clone();
        let rx = shutdown_rx.clone();
        let every = cfg.sync_interval();
        async move { sources.run_sync_loop(every, rx).await }
    });

    let state = AppState::new(users.clone(), sources.clone());
    let app = api::router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("binding {}", cfg.bind))?;
    tracing::info!(bind = %cfg.bind, "readnext listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Stop the sync loops, then flush once more so nothing dirty is lost.
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(user_loop, source_loop);
    users.sync_once();
    sources.sync_once();

    Ok(())
}
