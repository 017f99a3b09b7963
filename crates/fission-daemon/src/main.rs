use std::sync::Arc;

use fission_daemon::config::DaemonConfig;
use fission_daemon::{server, spawn_workers, AppState};
use tokio::sync::broadcast;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config; missing required settings are fatal
    let config = DaemonConfig::load()?;

    // 2. Initialize tracing; RUST_LOG wins over the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(project_id = %config.project_id, "fission daemon starting");

    // 3. Open database and build shared state
    let addr = config.listen_addr()?;
    let state = Arc::new(AppState::from_config(config)?);

    // 4. Start background workers
    let (shutdown_tx, _) = broadcast::channel(1);
    let workers = spawn_workers(&state, &shutdown_tx);

    // 5. Serve HTTP until Ctrl-C
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    let result = axum::serve(listener, server::router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
        })
        .await;
    if let Err(e) = &result {
        error!("HTTP server error: {}", e);
    }

    // Graceful shutdown
    let _ = shutdown_tx.send(());
    for worker in workers {
        let _ = worker.await;
    }

    info!("fission daemon stopped");
    result.map_err(Into::into)
}
