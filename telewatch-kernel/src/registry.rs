/**
 * POLLER REGISTRE - Rafraîchissement périodique du snapshot des devices
 *
 * RÔLE :
 * Interroge le Registry Service (GET, tableau JSON complet, sans pagination)
 * et remplace en bloc l'état registre de l'agrégateur.
 *
 * FONCTIONNEMENT :
 * - Premier poll au démarrage, puis toutes les `poll_interval_secs` (30s)
 * - Requête bornée par un timeout
 * - Échec (réseau, timeout, statut, payload invalide) : log + snapshot
 *   précédent conservé, nouvel essai au prochain intervalle
 * - Arrêt : le poll en cours est abandonné, pas attendu
 */

use crate::aggregator::LiveAggregator;
use crate::config::RegistryConf;
use crate::error::{KernelError, KernelResult};
use crate::health::HealthTracker;
use crate::models::RegistryRecord;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    url: String,
}

impl RegistryClient {
    pub fn new(url: &str, timeout: Duration) -> KernelResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: url.to_string() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Snapshot complet des devices enregistrés
    pub async fn poll(&self) -> KernelResult<Vec<RegistryRecord>> {
        let resp = self.http.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(KernelError::RegistryUnavailable(format!("{} answered {}", self.url, status)));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice::<Vec<RegistryRecord>>(&body)?)
    }
}

#[derive(Clone)]
pub struct RegistryPoller {
    client: RegistryClient,
    aggregator: LiveAggregator,
    health: HealthTracker,
    interval: Duration,
}

impl RegistryPoller {
    pub fn new(conf: &RegistryConf, aggregator: LiveAggregator, health: HealthTracker) -> KernelResult<Self> {
        let client = RegistryClient::new(&conf.url, Duration::from_secs(conf.timeout_secs.max(1)))?;
        Ok(Self {
            client,
            aggregator,
            health,
            interval: Duration::from_secs(conf.poll_interval_secs.max(1)),
        })
    }

    /// Un poll ; en cas d'échec l'état registre de l'agrégateur n'est pas touché
    pub async fn refresh(&self) -> KernelResult<usize> {
        match self.client.poll().await {
            Ok(records) => {
                let count = records.len();
                self.aggregator.apply_registry_snapshot(records);
                self.health.mark_registry_ok();
                info!("[registry] fetched {count} registered device(s)");
                Ok(count)
            }
            Err(e) => {
                let err = match e {
                    KernelError::RegistryUnavailable(_) => e,
                    other => KernelError::RegistryUnavailable(other.to_string()),
                };
                self.health.mark_registry_failure(&err.to_string());
                warn!(
                    "[registry] poll of {} failed, keeping previous snapshot ({} devices): {err}",
                    self.client.url(),
                    self.aggregator.registry_len()
                );
                Err(err)
            }
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = self.refresh() => {}
                        }
                    }
                }
            }
            info!("[registry] poller stopped");
        })
    }
}
