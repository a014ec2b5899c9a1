/**
 * API REST + WEBSOCKET TELEWATCH - Surface exposée du kernel
 *
 * RÔLE :
 * Point d'entrée unique pour observateurs (flux WebSocket) et outils de
 * pilotage de la simulation.
 *
 * ROUTES :
 * - GET  /ws                   : flux continu, un message JSON par lecture
 * - POST /trigger-broadcast    : diffusion immédiate hors cadence
 * - POST /update-interval      : {"intervalMs": n}, 400 si n < 500
 * - GET  /simulation-settings  : cadence courante + ids enregistrés
 * - GET  /devices              : vue live filtrée/triée
 * - GET  /devices/{id}         : vue live d'un device
 * - GET  /health, /system/health
 *
 * Pas d'authentification à ce niveau.
 */

use crate::aggregator::{DeviceQuery, LiveAggregator, SortDirection, SortField};
use crate::error::KernelError;
use crate::health::{HealthTracker, KernelHealth};
use crate::hub::BroadcastHub;
use crate::models::LiveDeviceView;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    pub aggregator: LiveAggregator,
    pub health: HealthTracker,
}

/// `intervalMs` accepté en entier, flottant ou chaîne numérique (tronqué à la ms)
fn interval_from_body(body: &[u8]) -> Option<u64> {
    let doc: serde_json::Value = serde_json::from_slice(body).ok()?;
    let ms = match doc.get("intervalMs")? {
        serde_json::Value::Number(n) => return n.as_u64().or_else(|| n.as_f64().and_then(whole_ms)),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    whole_ms(ms)
}

fn whole_ms(ms: f64) -> Option<u64> {
    (ms.is_finite() && ms >= 0.0).then(|| ms as u64)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationSettings {
    simulation_interval_ms: u64,
    registered_device_ids: Vec<String>,
    total_registered_devices: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevicesParams {
    filter: Option<String>,
    sort: Option<String>,
    direction: Option<String>,
    include_unregistered: Option<String>,
}

/// "true", "1", "yes", "on" (insensible à la casse) ; tout le reste vaut false
fn truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

impl From<DevicesParams> for DeviceQuery {
    fn from(p: DevicesParams) -> Self {
        DeviceQuery {
            filter: p.filter.unwrap_or_default(),
            sort: p.sort.as_deref().map(SortField::parse).unwrap_or_default(),
            direction: p.direction.as_deref().map(SortDirection::parse).unwrap_or_default(),
            include_unregistered: p.include_unregistered.as_deref().is_some_and(truthy),
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/ws", get(ws_upgrade))
        .route("/trigger-broadcast", post(trigger_broadcast))
        .route("/update-interval", post(update_interval))
        .route("/simulation-settings", get(simulation_settings))
        .route("/devices", get(list_devices))
        .route("/devices/{id}", get(get_device))
        .with_state(app_state)
}

// GET /ws (flux de lectures)
async fn ws_upgrade(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_observer(socket, app.hub))
}

async fn serve_observer(mut socket: WebSocket, hub: BroadcastHub) {
    let mut observer = hub.subscribe();
    let id = observer.id();
    let closed = observer.closed_token();

    loop {
        tokio::select! {
            frame = observer.recv() => {
                let Some(frame) = frame else {
                    // retiré par le hub (buffer saturé ou arrêt) : on ferme
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                let payload = match serde_json::to_string(&frame.reading) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("[http] failed to encode reading #{}: {e}", frame.seq);
                        continue;
                    }
                };
                // Client qui ne lit plus : l'envoi reste bloqué jusqu'à ce que le hub le retire
                let sent = tokio::select! {
                    biased;
                    res = socket.send(Message::Text(payload.into())) => res.is_ok(),
                    _ = closed.cancelled() => {
                        warn!("[http] observer {id} dropped while blocked on send, closing socket");
                        false
                    }
                };
                if !sent {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {} // messages clients ignorés
                }
            }
        }
    }

    hub.unsubscribe(id);
}

// POST /trigger-broadcast
async fn trigger_broadcast(State(app): State<AppState>) -> Json<serde_json::Value> {
    let frame = app.hub.trigger_once();
    Json(serde_json::json!({
        "message": "Sensor data broadcast triggered manually.",
        "reading": frame.reading,
    }))
}

// POST /update-interval {"intervalMs": n}
async fn update_interval(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, KernelError> {
    let interval_ms = interval_from_body(&body).ok_or_else(|| {
        KernelError::InvalidConfiguration("Please provide a valid interval (min 500 ms).".into())
    })?;

    app.hub.set_cadence(interval_ms)?;
    Ok(Json(serde_json::json!({
        "message": format!("Simulation interval updated to {interval_ms} ms")
    })))
}

// GET /simulation-settings
async fn simulation_settings(State(app): State<AppState>) -> Json<SimulationSettings> {
    let registered_device_ids = app.aggregator.registered_ids();
    Json(SimulationSettings {
        simulation_interval_ms: app.hub.cadence().as_millis() as u64,
        total_registered_devices: registered_device_ids.len(),
        registered_device_ids,
    })
}

// GET /devices?filter=&sort=&direction=&includeUnregistered=
async fn list_devices(
    State(app): State<AppState>,
    Query(params): Query<DevicesParams>,
) -> Json<Vec<LiveDeviceView>> {
    Json(app.aggregator.query(&params.into()))
}

// GET /devices/{id}
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LiveDeviceView>, StatusCode> {
    app.aggregator.device(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.hub, &app.aggregator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BroadcastConf;
    use crate::generator::TelemetryGenerator;
    use crate::models::RegistryRecord;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_state() -> AppState {
        let aggregator = LiveAggregator::new();
        let hub = BroadcastHub::new(&BroadcastConf::default(), TelemetryGenerator::default(), aggregator.clone());
        AppState { hub, aggregator, health: HealthTracker::new() }
    }

    fn record(id: &str, location: &str) -> RegistryRecord {
        serde_json::from_value(json!({"deviceId": id, "location": location, "isRegistered": true})).unwrap()
    }

    async fn call(app: &AppState, req: Request<Body>) -> (StatusCode, Value) {
        let resp = build_router(app.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_update_interval_rejects_small_values() {
        let app = app_state();
        let (status, body) = call(&app, post_json("/update-interval", r#"{"intervalMs": 200}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("500"));
        assert_eq!(app.hub.cadence().as_millis(), 2000);
    }

    #[tokio::test]
    async fn test_update_interval_rejects_missing_or_garbage_body() {
        let app = app_state();
        for body in ["{}", r#"{"intervalMs": "fast"}"#, r#"{"intervalMs": null}"#, r#"{"intervalMs": -800}"#, "not json", ""] {
            let (status, _) = call(&app, post_json("/update-interval", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
        }
        assert_eq!(app.hub.cadence().as_millis(), 2000);
    }

    #[tokio::test]
    async fn test_update_interval_applies_cadence() {
        let app = app_state();
        let (status, body) = call(&app, post_json("/update-interval", r#"{"intervalMs": 750}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Simulation interval updated to 750 ms");

        let (_, settings) = call(&app, get_req("/simulation-settings")).await;
        assert_eq!(settings["simulationIntervalMs"], 750);
    }

    #[tokio::test]
    async fn test_update_interval_accepts_float_and_numeric_string() {
        let app = app_state();
        let (status, _) = call(&app, post_json("/update-interval", r#"{"intervalMs": 1000.0}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.hub.cadence().as_millis(), 1000);

        let (status, body) = call(&app, post_json("/update-interval", r#"{"intervalMs": "1250.7"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Simulation interval updated to 1250 ms");

        let (status, _) = call(&app, post_json("/update-interval", r#"{"intervalMs": 499.9}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.hub.cadence().as_millis(), 1250);
    }

    #[tokio::test]
    async fn test_trigger_broadcast_reaches_observer() {
        let app = app_state();
        let mut obs = app.hub.subscribe();
        let (status, body) = call(&app, post_json("/trigger-broadcast", "")).await;
        assert_eq!(status, StatusCode::OK);

        let frame = obs.try_recv().unwrap();
        assert_eq!(body["reading"]["deviceId"], frame.reading.device_id.as_str());
    }

    #[tokio::test]
    async fn test_simulation_settings_lists_registered_ids() {
        let app = app_state();
        app.aggregator.apply_registry_snapshot(vec![record("d1", "A"), record("d2", "B")]);
        let (status, body) = call(&app, get_req("/simulation-settings")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalRegisteredDevices"], 2);
        assert_eq!(body["registeredDeviceIds"], json!(["d1", "d2"]));
        assert_eq!(body["simulationIntervalMs"], 2000);
    }

    #[tokio::test]
    async fn test_devices_query_params() {
        let app = app_state();
        app.aggregator.apply_registry_snapshot(vec![record("Alpha", "A"), record("beta", "B")]);
        app.hub.trigger_once();

        let (_, registered) = call(&app, get_req("/devices?sort=deviceId&direction=asc")).await;
        let ids: Vec<&str> = registered.as_array().unwrap().iter().map(|v| v["deviceId"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["Alpha", "beta"]);

        let (_, filtered) = call(&app, get_req("/devices?filter=ALP")).await;
        assert_eq!(filtered.as_array().unwrap().len(), 1);
        assert_eq!(filtered[0]["location"], "A");

        let (_, all) = call(&app, get_req("/devices?includeUnregistered=true")).await;
        assert!(all.as_array().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_include_unregistered_flag_is_lenient() {
        let app = app_state();
        app.aggregator.apply_registry_snapshot(vec![record("d1", "A")]);
        // registre non vide : on force une lecture d'un device hors registre
        let rogue: crate::models::TelemetryReading = serde_json::from_value(json!({
            "deviceId": "device_7", "temperature": 20.0, "humidity": 40.0, "battery": 50.0,
            "motionDetected": false, "fault": false, "lastActive": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        app.aggregator.apply_telemetry(rogue);

        for flag in ["1", "TRUE", "yes", "on"] {
            let (status, body) = call(&app, get_req(&format!("/devices?includeUnregistered={flag}"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body.as_array().unwrap().len(), 2, "flag {flag}");
        }
        for flag in ["0", "false", "nope", ""] {
            let (status, body) = call(&app, get_req(&format!("/devices?includeUnregistered={flag}"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body.as_array().unwrap().len(), 1, "flag {flag}");
        }
    }

    #[tokio::test]
    async fn test_get_device_not_found() {
        let app = app_state();
        let (status, _) = call(&app, get_req("/devices/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        app.aggregator.apply_registry_snapshot(vec![record("d1", "L")]);
        let (status, body) = call(&app, get_req("/devices/d1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["location"], "L");
        assert!(body["temperature"].is_null());
    }

    #[tokio::test]
    async fn test_system_health() {
        let app = app_state();
        let (status, body) = call(&app, get_req("/system/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["registry_status"], "pending");
        assert_eq!(body["observers_connected"], 0);
    }
}
