/*!
Stub du Registry Service pour tests sans blockchain

Sert `GET /get-devices` sur un port local éphémère. Le snapshot et le
comportement (réponse normale, erreur HTTP, JSON invalide, blocage) sont
modifiables à chaud pour simuler les pannes côté registre.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum StubBehavior {
    /// Renvoie le snapshot courant
    Serve,
    /// Répond avec ce statut HTTP
    Fail(u16),
    /// 200 avec un corps qui n'est pas un tableau de devices
    Malformed,
    /// Ne répond jamais (le client doit tomber en timeout)
    Stall,
}

#[derive(Clone)]
struct StubState {
    devices: Arc<Mutex<Vec<Value>>>,
    behavior: Arc<Mutex<StubBehavior>>,
    hits: Arc<AtomicUsize>,
}

/// Registry Service local ; le serveur s'arrête au drop
pub struct RegistryStub {
    addr: SocketAddr,
    state: StubState,
    server: JoinHandle<()>,
}

impl RegistryStub {
    pub async fn start() -> Result<Self> {
        Self::with_devices(Vec::new()).await
    }

    pub async fn with_devices(devices: Vec<Value>) -> Result<Self> {
        let state = StubState {
            devices: Arc::new(Mutex::new(devices)),
            behavior: Arc::new(Mutex::new(StubBehavior::Serve)),
            hits: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route("/get-devices", get(get_devices))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::warn!("registry stub stopped: {e}");
            }
        });
        log::info!("🧪 Registry stub listening on http://{addr}/get-devices");

        Ok(Self { addr, state, server })
    }

    pub fn url(&self) -> String {
        format!("http://{}/get-devices", self.addr)
    }

    pub fn set_devices(&self, devices: Vec<Value>) {
        *self.state.devices.lock() = devices;
    }

    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.state.behavior.lock() = behavior;
    }

    /// Nombre de requêtes reçues depuis le démarrage
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

impl Drop for RegistryStub {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn get_devices(State(state): State<StubState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let behavior = state.behavior.lock().clone();
    match behavior {
        StubBehavior::Serve => {
            let devices = state.devices.lock().clone();
            Json(Value::Array(devices)).into_response()
        }
        StubBehavior::Fail(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "Failed to fetch devices: stub failure").into_response()
        }
        StubBehavior::Malformed => (StatusCode::OK, r#"{"devices": "not-an-array"}"#).into_response(),
        StubBehavior::Stall => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}
