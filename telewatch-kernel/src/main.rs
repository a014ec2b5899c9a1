/**
 * TELEWATCH KERNEL - Point d'entrée du serveur de télémétrie
 *
 * RÔLE : Bootstrap : env, logging, config, pipeline (hub + poller registre),
 * puis API HTTP/WebSocket jusqu'au Ctrl-C.
 *
 * ARRÊT : le signal annule les tâches de fond et ferme les observateurs
 * avant la fin du graceful shutdown d'Axum.
 */

use anyhow::Context;
use telewatch_kernel::config::load_config;
use telewatch_kernel::hub::BroadcastHub;
use telewatch_kernel::Kernel;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("telewatch_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    let bind = cfg.http.bind.clone();

    let kernel = Kernel::start(cfg).context("failed to start kernel")?;
    let app = kernel.router();

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("[kernel] listening on http://{bind} (ws: /ws)");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(kernel.cancel_token(), kernel.hub().clone()))
        .await;

    kernel.shutdown().await;
    served.context("http server error")
}

// Les connexions WebSocket ne se terminent qu'une fois le hub fermé
async fn shutdown_signal(cancel: CancellationToken, hub: BroadcastHub) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("[kernel] failed to listen for ctrl-c: {e}");
                cancel.cancelled().await;
            }
        }
        _ = cancel.cancelled() => {}
    }
    info!("[kernel] shutdown requested");
    cancel.cancel();
    hub.close_all();
}
