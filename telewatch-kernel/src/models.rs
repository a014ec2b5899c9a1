use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use tracing::warn;

/// Identité d'un device, sensible à la casse, partagée registre/télémétrie
pub type DeviceId = String;

/// Enregistrement renvoyé par le Registry Service (GET /get-devices).
/// Snapshot immuable : remplacé en bloc à chaque poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRecord {
    pub device_id: DeviceId,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub is_registered: bool,
    #[serde(default)]
    pub owner: String,
    /// Epoch en secondes ; les entiers du smart contract arrivent souvent en string
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub last_active_timestamp: i64,
}

/// Lecture capteur diffusée aux observateurs (format wire du simulateur)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReading {
    pub device_id: DeviceId,
    pub temperature: f64,
    pub humidity: f64,
    pub battery: f64,
    pub motion_detected: bool,
    pub fault: bool,
    #[serde(rename = "lastActive", alias = "observedAt", with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

/// Projection live : champs registre + dernière lecture du même device.
/// Champs `None` = source absente (device non enregistré ou jamais vu en télémétrie).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDeviceView {
    pub device_id: DeviceId,
    pub device_type: Option<String>,
    pub location: Option<String>,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub is_registered: Option<bool>,
    pub owner: Option<String>,
    pub last_active_timestamp: Option<i64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub battery: Option<f64>,
    pub motion_detected: Option<bool>,
    pub fault: Option<bool>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_active: Option<OffsetDateTime>,
}

impl LiveDeviceView {
    pub fn merge(device_id: &str, record: Option<&RegistryRecord>, reading: Option<&TelemetryReading>) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_type: record.map(|r| r.device_type.clone()),
            location: record.map(|r| r.location.clone()),
            mac_address: record.map(|r| r.mac_address.clone()),
            ip_address: record.map(|r| r.ip_address.clone()),
            is_registered: record.map(|r| r.is_registered),
            owner: record.map(|r| r.owner.clone()),
            last_active_timestamp: record.map(|r| r.last_active_timestamp),
            temperature: reading.map(|t| t.temperature),
            humidity: reading.map(|t| t.humidity),
            battery: reading.map(|t| t.battery),
            motion_detected: reading.map(|t| t.motion_detected),
            fault: reading.map(|t| t.fault),
            last_active: reading.map(|t| t.observed_at),
        }
    }

    /// Instant d'activité en nanosecondes epoch : lecture capteur, sinon registre, sinon 0
    pub fn last_active_nanos(&self) -> i128 {
        if let Some(observed) = self.last_active {
            return observed.unix_timestamp_nanos();
        }
        self.last_active_timestamp
            .map(|secs| secs as i128 * 1_000_000_000)
            .unwrap_or(0)
    }
}

/// Toute valeur inexploitable (null, vide, texte non numérique, booléen...) vaut 0 :
/// un enregistrement douteux ne doit pas faire rejeter tout le snapshot
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let parsed = match &raw {
        None | Some(serde_json::Value::Null) => Some(0),
        Some(serde_json::Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Some(0),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        Some(_) => None,
    };
    Ok(parsed.unwrap_or_else(|| {
        warn!("[models] unusable lastActiveTimestamp {raw:?}, using 0");
        0
    }))
}
