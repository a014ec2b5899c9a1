use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

/// Cadence minimale acceptée pour la génération/broadcast
pub const MIN_INTERVAL_MS: u64 = 500;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub broadcast: BroadcastConf,
    pub registry: RegistryConf,
    pub generator: GeneratorConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String, // ex: "0.0.0.0:3002"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConf {
    pub interval_ms: u64,
    /// Messages en attente max par observateur avant déconnexion
    pub observer_buffer: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConf {
    pub url: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneratorConf {
    /// Nombre de slots device_N simulés (devices non enregistrés)
    pub synthetic_pool: u32,
    /// Probabilité de tirer un device enregistré quand il y en a
    pub registered_bias: f64,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3002".into() }
    }
}

impl Default for BroadcastConf {
    fn default() -> Self {
        Self { interval_ms: 2000, observer_buffer: 64 }
    }
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/get-devices".into(),
            poll_interval_secs: 30,
            timeout_secs: 5,
        }
    }
}

impl Default for GeneratorConf {
    fn default() -> Self {
        Self { synthetic_pool: 10, registered_bias: 0.6 }
    }
}

impl KernelConfig {
    /// Corrige les valeurs hors bornes au lieu d'échouer au démarrage
    pub fn sanitize(mut self) -> Self {
        if self.broadcast.interval_ms < MIN_INTERVAL_MS {
            warn!(
                "[config] broadcast.interval_ms={} below {}ms, using default",
                self.broadcast.interval_ms, MIN_INTERVAL_MS
            );
            self.broadcast.interval_ms = BroadcastConf::default().interval_ms;
        }
        if self.broadcast.observer_buffer == 0 {
            warn!("[config] broadcast.observer_buffer=0, using 1");
            self.broadcast.observer_buffer = 1;
        }
        if self.registry.poll_interval_secs == 0 {
            self.registry.poll_interval_secs = RegistryConf::default().poll_interval_secs;
        }
        if self.registry.timeout_secs == 0 {
            self.registry.timeout_secs = RegistryConf::default().timeout_secs;
        }
        if self.generator.synthetic_pool == 0 {
            self.generator.synthetic_pool = 1;
        }
        if !(0.0..=1.0).contains(&self.generator.registered_bias) {
            warn!("[config] generator.registered_bias={} out of [0,1], clamping", self.generator.registered_bias);
            self.generator.registered_bias = if self.generator.registered_bias.is_nan() {
                GeneratorConf::default().registered_bias
            } else {
                self.generator.registered_bias.clamp(0.0, 1.0)
            };
        }
        self
    }

    fn apply_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("TELEWATCH_REGISTRY_URL") {
            self.registry.url = url;
        }
        if let Ok(bind) = std::env::var("TELEWATCH_HTTP_BIND") {
            self.http.bind = bind;
        }
        self
    }
}

/// Parse le YAML ; contenu vide ou invalide = config par défaut
pub fn parse_config(txt: &str) -> KernelConfig {
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str::<KernelConfig>(txt)
        .unwrap_or_else(|e| {
            warn!("[config] invalid config: {e}");
            KernelConfig::default()
        })
        .sanitize()
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("TELEWATCH_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        info!("[config] loaded {path}");
        parse_config(&txt)
    } else {
        warn!("[config] no {path}, using default config");
        KernelConfig::default()
    };
    cfg.apply_env_overrides()
}
