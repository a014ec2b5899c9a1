/**
 * KERNEL - Assemblage et cycle de vie du pipeline
 *
 * RÔLE :
 * Construit agrégateur, hub, poller registre et health tracker à partir de
 * la config, démarre les tâches de fond et expose l'état partagé pour Axum.
 *
 * CYCLE DE VIE :
 * - `start` : ticker de diffusion + poller registre (un seul token d'annulation)
 * - `stop`  : annule les tâches et ferme toutes les connexions observateurs
 * - `join`  : attend la fin des tâches de fond
 */

use crate::aggregator::LiveAggregator;
use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::generator::TelemetryGenerator;
use crate::health::HealthTracker;
use crate::http::{build_router, AppState};
use crate::hub::BroadcastHub;
use crate::registry::RegistryPoller;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Kernel {
    config: KernelConfig,
    hub: BroadcastHub,
    aggregator: LiveAggregator,
    health: HealthTracker,
    poller: RegistryPoller,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Kernel {
    pub fn start(config: KernelConfig) -> KernelResult<Self> {
        let aggregator = LiveAggregator::new();
        let health = HealthTracker::new();
        let generator = TelemetryGenerator::new(&config.generator);
        let hub = BroadcastHub::new(&config.broadcast, generator, aggregator.clone());
        let poller = RegistryPoller::new(&config.registry, aggregator.clone(), health.clone())?;

        let cancel = CancellationToken::new();
        let tasks = vec![
            hub.spawn_ticker(cancel.clone()),
            poller.clone().spawn(cancel.clone()),
        ];
        info!(
            "[kernel] started: cadence {} ms, registry {} every {}s",
            config.broadcast.interval_ms, config.registry.url, config.registry.poll_interval_secs
        );

        Ok(Self { config, hub, aggregator, health, poller, cancel, tasks })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn aggregator(&self) -> &LiveAggregator {
        &self.aggregator
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn poller(&self) -> &RegistryPoller {
        &self.poller
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            hub: self.hub.clone(),
            aggregator: self.aggregator.clone(),
            health: self.health.clone(),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.app_state())
    }

    /// Token partagé, utile pour brancher un signal d'arrêt externe
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Idempotent
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("[kernel] stopping");
        }
        self.cancel.cancel();
        self.hub.close_all();
    }

    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("[kernel] background task ended abnormally: {e}");
            }
        }
        info!("[kernel] stopped");
    }

    pub async fn shutdown(self) {
        self.stop();
        self.join().await;
    }
}
