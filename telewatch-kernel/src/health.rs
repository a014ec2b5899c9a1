use crate::aggregator::LiveAggregator;
use crate::hub::BroadcastHub;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub observers_connected: u32,
    pub observers_dropped: u64,
    pub devices_tracked: u32,
    pub registered_devices: u32,
    pub cadence_ms: u64,
    pub registry_status: String,
    pub registry_consecutive_failures: u32,
    pub registry_total_failures: u64,
    pub last_registry_success: Option<String>,
    pub last_registry_error: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryHealth {
    consecutive_failures: u32,
    last_success: Option<OffsetDateTime>,
    last_error: Option<String>,
}

impl RegistryHealth {
    fn status(&self) -> &'static str {
        match (self.last_success, self.consecutive_failures) {
            (_, n) if n > 0 => "failing",
            (Some(_), _) => "ok",
            (None, _) => "pending",
        }
    }
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    registry_failures: Arc<AtomicU64>,
    registry: Arc<Mutex<RegistryHealth>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            registry_failures: Arc::new(AtomicU64::new(0)),
            registry: Arc::new(Mutex::new(RegistryHealth::default())),
        }
    }

    pub fn mark_registry_ok(&self) {
        let mut registry = self.registry.lock();
        registry.consecutive_failures = 0;
        registry.last_success = Some(OffsetDateTime::now_utc());
        registry.last_error = None;
    }

    pub fn mark_registry_failure(&self, error: &str) {
        self.registry_failures.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.lock();
        registry.consecutive_failures = registry.consecutive_failures.saturating_add(1);
        registry.last_error = Some(error.to_string());
    }

    pub fn registry_status(&self) -> &'static str {
        self.registry.lock().status()
    }

    pub fn get_health(&self, hub: &BroadcastHub, aggregator: &LiveAggregator) -> KernelHealth {
        let registry = self.registry.lock();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            observers_connected: hub.observer_count() as u32,
            observers_dropped: hub.dropped_count(),
            devices_tracked: aggregator.tracked_devices() as u32,
            registered_devices: aggregator.registry_len() as u32,
            cadence_ms: hub.cadence().as_millis() as u64,
            registry_status: registry.status().to_string(),
            registry_consecutive_failures: registry.consecutive_failures,
            registry_total_failures: self.registry_failures.load(Ordering::Relaxed),
            last_registry_success: registry.last_success.and_then(|t| t.format(&Rfc3339).ok()),
            last_registry_error: registry.last_error.clone(),
        }
    }
}
