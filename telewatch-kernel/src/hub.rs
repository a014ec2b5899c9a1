/**
 * BROADCAST HUB - Diffusion des lectures capteur vers tous les observateurs
 *
 * RÔLE :
 * Possède l'ensemble des observateurs connectés et la cadence de génération.
 * Chaque tick : génère une lecture, l'injecte dans l'agrégateur, puis la
 * pousse à chaque observateur.
 *
 * FONCTIONNEMENT :
 * - Un canal mpsc borné par observateur, envoi `try_send` non bloquant
 * - Buffer plein => observateur déconnecté (jamais de backpressure sur le hub)
 * - Chaque retrait déclenche le token `closed` de l'observateur, pour couper
 *   une connexion bloquée en écriture
 * - Génération + fan-out sérialisés : ordre de génération garanti par observateur
 * - Ticker unique reprogrammé via un canal watch lors d'un changement de cadence :
 *   prochain tick = dernier tick + nouvelle cadence, ou immédiat si déjà dépassé
 * - `trigger_once` diffuse hors ticker sans toucher à son planning
 */

use crate::aggregator::LiveAggregator;
use crate::config::{BroadcastConf, MIN_INTERVAL_MS};
use crate::error::{KernelError, KernelResult};
use crate::generator::TelemetryGenerator;
use crate::models::TelemetryReading;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ObserverId = Uuid;

/// Lecture diffusée, numérotée dans l'ordre de génération
#[derive(Debug)]
pub struct BroadcastFrame {
    pub seq: u64,
    pub reading: TelemetryReading,
}

/// Côté réception d'un observateur. `recv` renvoie `None` une fois
/// l'observateur retiré du hub (désabonnement, saturation ou arrêt).
pub struct ObserverHandle {
    id: ObserverId,
    receiver: mpsc::Receiver<Arc<BroadcastFrame>>,
    closed: CancellationToken,
}

impl ObserverHandle {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Annulé dès que le hub retire cet observateur, même avec des lectures encore en buffer
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub async fn recv(&mut self) -> Option<Arc<BroadcastFrame>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<BroadcastFrame>> {
        self.receiver.try_recv().ok()
    }
}

struct ObserverSlot {
    tx: mpsc::Sender<Arc<BroadcastFrame>>,
    closed: CancellationToken,
}

impl Drop for ObserverSlot {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

struct HubInner {
    observers: Mutex<HashMap<ObserverId, ObserverSlot>>,
    // Dernier numéro émis ; le verrou couvre génération + fan-out
    sequence: Mutex<u64>,
    generator: TelemetryGenerator,
    aggregator: LiveAggregator,
    observer_buffer: usize,
    cadence: watch::Sender<Duration>,
    dropped: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(conf: &BroadcastConf, generator: TelemetryGenerator, aggregator: LiveAggregator) -> Self {
        let interval = Duration::from_millis(conf.interval_ms.max(MIN_INTERVAL_MS));
        let (cadence, _) = watch::channel(interval);
        Self {
            inner: Arc::new(HubInner {
                observers: Mutex::new(HashMap::new()),
                sequence: Mutex::new(0),
                generator,
                aggregator,
                observer_buffer: conf.observer_buffer.max(1),
                cadence,
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn subscribe(&self) -> ObserverHandle {
        let (tx, receiver) = mpsc::channel(self.inner.observer_buffer);
        let id = Uuid::new_v4();
        let closed = CancellationToken::new();
        let slot = ObserverSlot { tx, closed: closed.clone() };
        let mut observers = self.inner.observers.lock();
        // Hub arrêté : le slot est jeté (token annulé), recv() renvoie None tout de suite
        if !self.inner.closed.load(Ordering::Acquire) {
            observers.insert(id, slot);
            info!("[hub] observer {id} connected ({} total)", observers.len());
        }
        ObserverHandle { id, receiver, closed }
    }

    /// Idempotent ; renvoie true si l'observateur était encore inscrit
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.inner.observers.lock().remove(&id).is_some();
        if removed {
            info!("[hub] observer {id} disconnected");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Observateurs déconnectés pour buffer saturé depuis le démarrage
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn cadence(&self) -> Duration {
        *self.inner.cadence.borrow()
    }

    pub fn set_cadence(&self, interval_ms: u64) -> KernelResult<()> {
        if interval_ms < MIN_INTERVAL_MS {
            return Err(KernelError::InvalidConfiguration(format!(
                "intervalMs must be at least {MIN_INTERVAL_MS} (got {interval_ms})"
            )));
        }
        self.inner.cadence.send_replace(Duration::from_millis(interval_ms));
        info!("[hub] simulation interval updated to {interval_ms} ms");
        Ok(())
    }

    /// Génère et diffuse une lecture immédiatement, indépendamment du ticker
    pub fn trigger_once(&self) -> Arc<BroadcastFrame> {
        let mut seq = self.inner.sequence.lock();
        let registered = self.inner.aggregator.registered_ids();
        let reading = self.inner.generator.produce(&registered);
        *seq += 1;
        let frame = Arc::new(BroadcastFrame { seq: *seq, reading });

        self.inner.aggregator.apply_telemetry(frame.reading.clone());
        self.fan_out(&frame);
        debug!("[hub] broadcast #{} for {}", frame.seq, frame.reading.device_id);
        frame
    }

    fn fan_out(&self, frame: &Arc<BroadcastFrame>) {
        // Copie des senders : subscribe/unsubscribe ne sont pas bloqués pendant l'envoi
        let targets: Vec<(ObserverId, mpsc::Sender<Arc<BroadcastFrame>>)> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(id, slot)| (*id, slot.tx.clone()))
            .collect();

        let mut stale = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("[hub] {}, dropping it", KernelError::ObserverUnresponsive(id));
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    stale.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stale.push(id),
            }
        }

        if !stale.is_empty() {
            let mut observers = self.inner.observers.lock();
            for id in stale {
                observers.remove(&id);
            }
        }
    }

    /// Ferme toutes les connexions ; les abonnements ultérieurs sont refusés
    pub fn close_all(&self) {
        let closed = {
            let mut observers = self.inner.observers.lock();
            self.inner.closed.store(true, Ordering::Release);
            let n = observers.len();
            observers.clear();
            n
        };
        info!("[hub] closed {closed} observer connection(s)");
    }

    /// Démarre le ticker périodique ; s'arrête à l'annulation du token
    pub fn spawn_ticker(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let hub = self.clone();
        let cadence_rx = self.inner.cadence.subscribe();
        tokio::spawn(run_ticker(hub, cadence_rx, cancel))
    }
}

async fn run_ticker(hub: BroadcastHub, mut cadence_rx: watch::Receiver<Duration>, cancel: CancellationToken) {
    let mut period = *cadence_rx.borrow_and_update();
    let mut last_tick = Instant::now();
    let mut next_tick = last_tick + period;
    info!("[hub] ticker started ({} ms)", period.as_millis());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep_until(next_tick) => {
                hub.trigger_once();
                last_tick = Instant::now();
                next_tick = last_tick + period;
            }
            changed = cadence_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                period = *cadence_rx.borrow_and_update();
                // Jamais deux ticks à moins d'une période, jamais de tick en attente perdu
                next_tick = (last_tick + period).max(Instant::now());
                debug!("[hub] ticker rescheduled, next tick in {:?}", next_tick.saturating_duration_since(Instant::now()));
            }
        }
    }
    info!("[hub] ticker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub_with(interval_ms: u64, observer_buffer: usize) -> BroadcastHub {
        BroadcastHub::new(
            &BroadcastConf { interval_ms, observer_buffer },
            TelemetryGenerator::default(),
            LiveAggregator::new(),
        )
    }

    fn assert_elapsed(start: Instant, expected_ms: u64) {
        let elapsed = start.elapsed();
        let expected = Duration::from_millis(expected_ms);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(20),
            "expected ~{expected:?}, got {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_trigger_once_reaches_every_observer_in_order() {
        let hub = hub_with(2000, 16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        let sent: Vec<u64> = (0..5).map(|_| hub.trigger_once().seq).collect();
        assert_eq!(sent, vec![1, 2, 3, 4, 5]);

        for obs in [&mut a, &mut b] {
            let got: Vec<u64> = (0..5).map(|_| obs.try_recv().unwrap().seq).collect();
            assert_eq!(got, sent);
            assert!(obs.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_broadcast_feeds_aggregator() {
        let aggregator = LiveAggregator::new();
        let hub = BroadcastHub::new(&BroadcastConf::default(), TelemetryGenerator::default(), aggregator.clone());
        let frame = hub.trigger_once();
        let view = aggregator.device(&frame.reading.device_id).unwrap();
        assert_eq!(view.temperature, Some(frame.reading.temperature));
    }

    #[tokio::test]
    async fn test_slow_observer_is_dropped_healthy_one_keeps_order() {
        let hub = hub_with(2000, 2);
        let mut slow = hub.subscribe();
        let mut healthy = hub.subscribe();

        let mut received = Vec::new();
        for _ in 0..6 {
            let frame = hub.trigger_once();
            received.push(healthy.try_recv().unwrap().seq);
            assert_eq!(received.last(), Some(&frame.seq));
        }
        assert_eq!(received, vec![1, 2, 3, 4, 5, 6]);

        assert_eq!(hub.observer_count(), 1);
        assert_eq!(hub.dropped_count(), 1);
        assert!(slow.closed_token().is_cancelled());
        assert!(!healthy.closed_token().is_cancelled());

        // Le lent vide son buffer puis voit la fermeture
        assert_eq!(slow.recv().await.unwrap().seq, 1);
        assert_eq!(slow.recv().await.unwrap().seq, 2);
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = hub_with(2000, 4);
        let mut obs = hub.subscribe();
        assert!(hub.unsubscribe(obs.id()));
        assert!(!hub.unsubscribe(obs.id()));
        hub.trigger_once();
        assert!(obs.recv().await.is_none());
        assert_eq!(hub.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_token_fires_on_every_removal() {
        let hub = hub_with(2000, 4);
        let a = hub.subscribe();
        let b = hub.subscribe();
        let (a_closed, b_closed) = (a.closed_token(), b.closed_token());

        hub.unsubscribe(a.id());
        assert!(a_closed.is_cancelled());
        assert!(!b_closed.is_cancelled());

        hub.close_all();
        b_closed.cancelled().await;
        assert!(hub.subscribe().closed_token().is_cancelled());
    }

    #[test]
    fn test_cadence_below_minimum_is_rejected() {
        let hub = hub_with(2000, 4);
        let err = hub.set_cadence(499).unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfiguration(_)));
        assert_eq!(hub.cadence(), Duration::from_millis(2000));

        hub.set_cadence(500).unwrap();
        assert_eq!(hub.cadence(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_follows_cadence() {
        let hub = hub_with(1000, 16);
        let mut obs = hub.subscribe();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = hub.spawn_ticker(cancel.clone());

        for (i, expected_ms) in [1000, 2000, 3000].into_iter().enumerate() {
            let frame = obs.recv().await.unwrap();
            assert_eq!(frame.seq, i as u64 + 1);
            assert_elapsed(start, expected_ms);
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_swap_keeps_last_tick_as_anchor() {
        let hub = hub_with(2000, 16);
        let mut obs = hub.subscribe();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = hub.spawn_ticker(cancel.clone());

        obs.recv().await.unwrap();
        assert_elapsed(start, 2000);

        tokio::time::sleep(Duration::from_millis(500)).await;
        hub.set_cadence(800).unwrap();

        // dernier tick à 2000 + 800
        assert_eq!(obs.recv().await.unwrap().seq, 2);
        assert_elapsed(start, 2800);
        assert_eq!(obs.recv().await.unwrap().seq, 3);
        assert_elapsed(start, 3600);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_tick_fires_immediately_after_swap() {
        let hub = hub_with(5000, 16);
        let mut obs = hub.subscribe();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = hub.spawn_ticker(cancel.clone());

        obs.recv().await.unwrap();
        assert_elapsed(start, 5000);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        let swapped_at = Instant::now();
        hub.set_cadence(1000).unwrap();

        // 5000 + 1000 est déjà passé : tick immédiat, pas de trou > 2x la nouvelle cadence
        obs.recv().await.unwrap();
        assert!(swapped_at.elapsed() <= Duration::from_millis(2000));
        assert_elapsed(start, 8000);
        obs.recv().await.unwrap();
        assert_elapsed(start, 9000);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_once_does_not_reset_schedule() {
        let hub = hub_with(2000, 16);
        let mut obs = hub.subscribe();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = hub.spawn_ticker(cancel.clone());

        tokio::time::sleep(Duration::from_millis(700)).await;
        hub.trigger_once();
        assert_eq!(obs.recv().await.unwrap().seq, 1);
        assert_elapsed(start, 700);

        assert_eq!(obs.recv().await.unwrap().seq, 2);
        assert_elapsed(start, 2000);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_close_all_stop_everything() {
        let hub = hub_with(1000, 16);
        let mut obs = hub.subscribe();
        let cancel = CancellationToken::new();
        let task = hub.spawn_ticker(cancel.clone());

        cancel.cancel();
        hub.close_all();
        task.await.unwrap();

        assert!(obs.recv().await.is_none());
        assert_eq!(hub.observer_count(), 0);

        let mut late = hub.subscribe();
        assert!(late.recv().await.is_none());
    }
}
