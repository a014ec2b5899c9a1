/**
 * AGRÉGATEUR LIVE - Fusion snapshot registre + dernière lecture par device
 *
 * RÔLE :
 * Seule surface de lecture côté consommateurs. Deux tables protégées par un
 * unique verrou : registre (remplacé en bloc à chaque poll) et télémétrie
 * (upsert de la dernière lecture, jamais d'éviction).
 *
 * FONCTIONNEMENT :
 * - Écrivains : poller registre + hub (sink interne, ordre de génération)
 * - Lecteurs : `query` copie un snapshot cohérent sous verrou puis
 *   filtre/trie hors verrou
 * - Ordre d'entrée : registre dans l'ordre du snapshot, puis devices
 *   télémétrie-only dans l'ordre de première apparition
 */

use crate::models::{LiveDeviceView, RegistryRecord, TelemetryReading};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    DeviceId,
    Temperature,
    Humidity,
    Battery,
    #[default]
    LastActive,
}

impl SortField {
    /// Champ inconnu => lastActive
    pub fn parse(raw: &str) -> Self {
        match raw {
            "deviceId" => SortField::DeviceId,
            "temperature" => SortField::Temperature,
            "humidity" => SortField::Humidity,
            "battery" => SortField::Battery,
            _ => SortField::LastActive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("asc") {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }
}

/// Paramètres d'une requête sur la vue live
#[derive(Debug, Clone, Default)]
pub struct DeviceQuery {
    pub filter: String,
    pub sort: SortField,
    pub direction: SortDirection,
    pub include_unregistered: bool,
}

#[derive(Default)]
struct AggregatorState {
    registry: Arc<Vec<RegistryRecord>>,
    registry_index: Arc<HashMap<String, usize>>,
    telemetry: Vec<TelemetryReading>,
    telemetry_index: HashMap<String, usize>,
}

/// Copie point-in-time, lue sans verrou
struct Snapshot {
    registry: Arc<Vec<RegistryRecord>>,
    registry_index: Arc<HashMap<String, usize>>,
    telemetry: Vec<TelemetryReading>,
    telemetry_index: HashMap<String, usize>,
}

#[derive(Clone, Default)]
pub struct LiveAggregator {
    state: Arc<Mutex<AggregatorState>>,
}

impl LiveAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remplace tout le registre ; un id dupliqué garde sa première position, la dernière valeur gagne
    pub fn apply_registry_snapshot(&self, records: Vec<RegistryRecord>) {
        let mut deduped: Vec<RegistryRecord> = Vec::with_capacity(records.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for record in records {
            match index.get(&record.device_id) {
                Some(&pos) => {
                    warn!("[aggregator] duplicate registry id {} in snapshot", record.device_id);
                    deduped[pos] = record;
                }
                None => {
                    index.insert(record.device_id.clone(), deduped.len());
                    deduped.push(record);
                }
            }
        }

        let mut state = self.state.lock();
        state.registry = Arc::new(deduped);
        state.registry_index = Arc::new(index);
    }

    /// La lecture la plus récente remplace entièrement la précédente
    pub fn apply_telemetry(&self, reading: TelemetryReading) {
        let mut state = self.state.lock();
        match state.telemetry_index.get(&reading.device_id).copied() {
            Some(pos) => state.telemetry[pos] = reading,
            None => {
                let pos = state.telemetry.len();
                state.telemetry_index.insert(reading.device_id.clone(), pos);
                state.telemetry.push(reading);
            }
        }
    }

    /// Ids du snapshot registre, dans l'ordre du snapshot
    pub fn registered_ids(&self) -> Vec<String> {
        let registry = self.state.lock().registry.clone();
        registry.iter().map(|r| r.device_id.clone()).collect()
    }

    pub fn registry_len(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Nombre d'identités distinctes connues (registre ∪ télémétrie)
    pub fn tracked_devices(&self) -> usize {
        let state = self.state.lock();
        let telemetry_only = state
            .telemetry
            .iter()
            .filter(|t| !state.registry_index.contains_key(&t.device_id))
            .count();
        state.registry.len() + telemetry_only
    }

    pub fn device(&self, device_id: &str) -> Option<LiveDeviceView> {
        let snap = self.snapshot();
        let record = snap.registry_index.get(device_id).map(|&i| &snap.registry[i]);
        let reading = snap.telemetry_index.get(device_id).map(|&i| &snap.telemetry[i]);
        if record.is_none() && reading.is_none() {
            return None;
        }
        Some(LiveDeviceView::merge(device_id, record, reading))
    }

    pub fn query(&self, query: &DeviceQuery) -> Vec<LiveDeviceView> {
        let snap = self.snapshot();

        let mut views: Vec<LiveDeviceView> = snap
            .registry
            .iter()
            .map(|record| {
                let reading = snap.telemetry_index.get(&record.device_id).map(|&i| &snap.telemetry[i]);
                LiveDeviceView::merge(&record.device_id, Some(record), reading)
            })
            .collect();

        if query.include_unregistered {
            views.extend(
                snap.telemetry
                    .iter()
                    .filter(|t| !snap.registry_index.contains_key(&t.device_id))
                    .map(|t| LiveDeviceView::merge(&t.device_id, None, Some(t))),
            );
        }

        let needle = query.filter.to_lowercase();
        if !needle.is_empty() {
            views.retain(|v| v.device_id.to_lowercase().contains(&needle));
        }

        // sort_by est stable : les égalités gardent l'ordre d'entrée
        views.sort_by(|a, b| {
            let ord = compare(query.sort, a, b);
            match query.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        views
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            registry: state.registry.clone(),
            registry_index: state.registry_index.clone(),
            telemetry: state.telemetry.clone(),
            telemetry_index: state.telemetry_index.clone(),
        }
    }
}

fn compare(field: SortField, a: &LiveDeviceView, b: &LiveDeviceView) -> Ordering {
    match field {
        SortField::DeviceId => a.device_id.to_lowercase().cmp(&b.device_id.to_lowercase()),
        SortField::Temperature => numeric(a.temperature).total_cmp(&numeric(b.temperature)),
        SortField::Humidity => numeric(a.humidity).total_cmp(&numeric(b.humidity)),
        SortField::Battery => numeric(a.battery).total_cmp(&numeric(b.battery)),
        SortField::LastActive => a.last_active_nanos().cmp(&b.last_active_nanos()),
    }
}

/// Valeur absente ou non finie = 0
fn numeric(v: Option<f64>) -> f64 {
    v.filter(|x| x.is_finite()).unwrap_or(0.0)
}
