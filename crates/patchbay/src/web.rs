//! HTTP surface.
//!
//! Every route is served at the root and again under `/api`. The `/api/alsa`
//! and `/api/jack/control` paths keep older clients working.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use patchgraph::{DeviceId, Engine, LoadedDevice, Patch, PatchError};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

#[derive(Clone)]
pub struct WebState {
    pub engine: Engine,
    pub start_time: Instant,
}

/// Error body returned to HTTP callers: `{"message": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl From<PatchError> for ApiError {
    fn from(err: PatchError) -> Self {
        let status = match &err {
            PatchError::UnknownDevice(_) => StatusCode::NOT_FOUND,
            PatchError::InvalidPortRole { .. } => StatusCode::BAD_REQUEST,
            PatchError::DeviceBusy(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &err {
            PatchError::Storage(e) => {
                tracing::error!("storage failure: {:#}", e);
                "storage failure".to_string()
            }
            other => {
                if status.is_server_error() {
                    tracing::warn!("request failed: {}", other);
                }
                other.to_string()
            }
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: WebState) -> Router {
    let api = api_routes();
    Router::new()
        .route("/", get(serve_root))
        .route("/health", get(health))
        .merge(api.clone())
        .nest("/api", api.merge(legacy_routes()))
        .with_state(state)
}

fn api_routes() -> Router<WebState> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/refresh", post(refresh_devices))
        .route("/devices/load", get(loaded_devices).post(attach_device))
        .route("/devices/load/{device_id}", delete(detach_device))
        .route("/devices/{id}", get(device_detail).delete(forget_device))
        .route("/ports", get(list_ports))
        .route("/patches", get(list_patches).post(connect).delete(disconnect))
        .route("/patches/saved", get(saved_patches))
        .route("/reconcile", post(reconcile))
        .route("/server", get(server_status).post(start_server).delete(stop_server))
}

fn legacy_routes() -> Router<WebState> {
    Router::new()
        .route("/alsa/devices", get(list_devices))
        .route("/alsa/load", post(attach_device))
        .route("/alsa/load/{device_id}", delete(detach_device))
        .route(
            "/jack/control/server",
            get(server_status).post(start_server).delete(stop_server),
        )
}

async fn serve_root() -> impl IntoResponse {
    Json(json!({
        "name": "patchbay",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "devices": "/devices",
            "ports": "/ports",
            "patches": "/patches",
            "server": "/server",
            "health": "/health",
        }
    }))
}

async fn health(State(state): State<WebState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// Devices

async fn list_devices(State(state): State<WebState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.list_devices()?))
}

async fn refresh_devices(State(state): State<WebState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.refresh_catalog().await?))
}

async fn device_detail(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.device_detail(&DeviceId::from(id))?))
}

async fn forget_device(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.engine.forget_device(&DeviceId::from(id))?;
    Ok(Json(json!({ "message": "Device removed" })))
}

async fn loaded_devices(State(state): State<WebState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.loaded_devices()?))
}

async fn attach_device(
    State(state): State<WebState>,
    payload: Result<Json<LoadedDevice>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload.map_err(ApiError::bad_request)?;
    let loaded = state.engine.attach(request).await?;
    Ok(Json(json!({ "message": "Device loaded", "device": loaded })))
}

async fn detach_device(
    State(state): State<WebState>,
    Path(device_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.engine.detach(&DeviceId::from(device_id)).await?;
    Ok(Json(json!({ "message": "Device unloaded" })))
}

// Ports and patches

async fn list_ports(State(state): State<WebState>) -> ApiResult<impl IntoResponse> {
    let ports = state.engine.list_ports().await?;
    Ok(Json(json!({ "ports": ports })))
}

async fn list_patches(State(state): State<WebState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.list_patches().await?))
}

async fn saved_patches(State(state): State<WebState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.saved_patches()?))
}

async fn connect(
    State(state): State<WebState>,
    payload: Result<Json<Patch>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(patch) = payload.map_err(ApiError::bad_request)?;
    state.engine.connect(&patch).await?;
    Ok(Json(json!({ "message": "Ports connected" })))
}

async fn disconnect(
    State(state): State<WebState>,
    payload: Result<Json<Patch>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(patch) = payload.map_err(ApiError::bad_request)?;
    state.engine.disconnect(&patch).await?;
    Ok(Json(json!({ "message": "Ports disconnected" })))
}

async fn reconcile(State(state): State<WebState>) -> impl IntoResponse {
    Json(state.engine.reconcile().await)
}

// Daemon control

#[derive(Debug, Deserialize)]
struct ServerStartRequest {
    #[serde(default = "ServerStartRequest::default_rate")]
    rate: u32,
    #[serde(default = "ServerStartRequest::default_period")]
    period: u32,
}

impl ServerStartRequest {
    fn default_rate() -> u32 {
        48000
    }

    fn default_period() -> u32 {
        256
    }
}

async fn server_status(State(state): State<WebState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.server_status().await?))
}

async fn start_server(
    State(state): State<WebState>,
    payload: Result<Json<ServerStartRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload.map_err(ApiError::bad_request)?;
    let report = state.engine.start_server(request.rate, request.period).await?;
    Ok(Json(json!({ "message": "Server started", "reconcile": report })))
}

async fn stop_server(State(state): State<WebState>) -> ApiResult<impl IntoResponse> {
    state.engine.stop_server().await?;
    Ok(Json(json!({ "message": "Server stopped" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use patchgraph::testing::FakeRig;
    use serde_json::Value;
    use tower::ServiceExt;

    struct TestApp {
        rig: FakeRig,
        app: Router,
        usb: DeviceId,
        pch: DeviceId,
    }

    async fn setup_test_app() -> TestApp {
        let rig = FakeRig::new();
        let usb = rig.add_device(1, "USB (USB Audio)", 0, "USB Audio");
        let pch = rig.add_device(0, "PCH", 0, "ALC892 Analog");
        let engine = rig.engine();
        engine.refresh_catalog().await.unwrap();

        let app = router(WebState {
            engine,
            start_time: Instant::now(),
        });
        TestApp { rig, app, usb, pch }
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    fn load_body(id: &DeviceId) -> Value {
        json!({"deviceId": id, "client": "lowLatencyClient", "rate": 48000, "period": 256, "nperiods": 2})
    }

    fn patch_body(src: &DeviceId, dst: &DeviceId) -> Value {
        json!({
            "source": {"id": src, "direction": "capture", "channel": 1},
            "destination": {"id": dst, "direction": "playback", "channel": 2}
        })
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let t = setup_test_app().await;
        let (status, body) = send(&t.app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "patchbay");

        let (status, body) = send(&t.app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_list_devices_with_summaries() {
        let t = setup_test_app().await;
        let (status, body) = send(&t.app, Method::GET, "/devices", None).await;
        assert_eq!(status, StatusCode::OK);

        let devices = body.as_array().unwrap();
        assert_eq!(devices.len(), 2);
        let usb = devices.iter().find(|d| d["id"] == t.usb.as_str()).unwrap();
        assert_eq!(usb["card_name"], "USB (USB Audio)");
        assert_eq!(usb["playback"]["rate"], 96000);
        assert_eq!(usb["capture"]["channels"], 2);

        let (_, legacy) = send(&t.app, Method::GET, "/api/alsa/devices", None).await;
        assert_eq!(legacy, body);
    }

    #[tokio::test]
    async fn test_device_detail_and_unknown() {
        let t = setup_test_app().await;
        let (status, body) = send(&t.app, Method::GET, &format!("/devices/{}", t.usb), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["capture"]["rate_min"], 44100);
        assert!(body["loaded"].is_null());

        let (status, body) = send(&t.app, Method::GET, "/api/devices/ffffffffffffffff", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "unknown device: ffffffffffffffff");
    }

    #[tokio::test]
    async fn test_load_and_unload() {
        let t = setup_test_app().await;
        let (status, body) = send(&t.app, Method::POST, "/devices/load", Some(load_body(&t.usb))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device"]["client"], "lowLatencyClient");

        let (_, loaded) = send(&t.app, Method::GET, "/devices/load", None).await;
        assert_eq!(loaded.as_array().unwrap().len(), 1);

        let (status, _) = send(&t.app, Method::DELETE, &format!("/devices/{}", t.usb), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/api/alsa/load/{}", t.usb);
        let (status, body) = send(&t.app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Device unloaded");

        let (_, loaded) = send(&t.app, Method::GET, "/devices/load", None).await;
        assert!(loaded.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_unknown_device_is_404() {
        let t = setup_test_app().await;
        let ghost = DeviceId::from("0123456789abcdef");
        let (status, _) = send(&t.app, Method::POST, "/devices/load", Some(load_body(&ghost))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_load_accepts_legacy_client_name() {
        let t = setup_test_app().await;
        let body = json!({"deviceId": t.usb, "client": "alsa", "rate": 44100, "period": 128, "nperiods": 3});
        let (status, body) = send(&t.app, Method::POST, "/api/alsa/load", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device"]["client"], "nativeClient");
        assert_eq!(t.rig.invocations_of("alsa_in").len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let t = setup_test_app().await;
        let (status, body) = send(
            &t.app,
            Method::POST,
            "/patches",
            Some(json!({"source": {"id": "abc"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_patch_round_trip() {
        let t = setup_test_app().await;
        for id in [&t.usb, &t.pch] {
            let (status, _) = send(&t.app, Method::POST, "/devices/load", Some(load_body(id))).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, ports) = send(&t.app, Method::GET, "/ports", None).await;
        assert_eq!(ports["ports"].as_array().unwrap().len(), 8);

        let patch = patch_body(&t.pch, &t.usb);
        let (status, _) = send(&t.app, Method::POST, "/patches", Some(patch.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (_, groups) = send(&t.app, Method::GET, "/patches", None).await;
        assert_eq!(groups.as_array().unwrap().len(), 1);
        assert_eq!(groups[0]["source"], patch["source"]);
        assert_eq!(groups[0]["destinations"][0], patch["destination"]);

        let (_, saved) = send(&t.app, Method::GET, "/patches/saved", None).await;
        assert_eq!(saved.as_array().unwrap().len(), 1);

        let (status, _) = send(&t.app, Method::DELETE, "/patches", Some(patch)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, groups) = send(&t.app, Method::GET, "/patches", None).await;
        assert!(groups.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reversed_patch_is_400_without_commands() {
        let t = setup_test_app().await;
        t.rig.clear_invocations();

        let body = json!({
            "source": {"id": t.usb, "direction": "out", "channel": 1},
            "destination": {"id": t.pch, "direction": "in", "channel": 1}
        });
        let (status, body) = send(&t.app, Method::POST, "/api/patches", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("invalid port roles"));
        assert!(t.rig.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_routing_failure_is_500_without_tool_output() {
        let t = setup_test_app().await;
        t.rig.stop_daemon();

        let (status, body) = send(&t.app, Method::GET, "/ports", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["message"].as_str().unwrap();
        assert_eq!(message, "jack_lsp failed: jack_lsp exited with status 1");
    }

    #[tokio::test]
    async fn test_server_control_and_reconcile() {
        let t = setup_test_app().await;
        send(&t.app, Method::POST, "/devices/load", Some(load_body(&t.usb))).await;

        let (status, _) = send(&t.app, Method::DELETE, "/api/jack/control/server", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, state) = send(&t.app, Method::GET, "/server", None).await;
        assert_eq!(state["running"], false);

        let (status, body) = send(&t.app, Method::POST, "/server", Some(json!({"rate": 44100}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reconcile"]["devices_attached"], 1);

        let (status, report) = send(&t.app, Method::POST, "/reconcile", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["devices_present"], 1);
        assert_eq!(report["devices_attached"], 0);
    }

    #[tokio::test]
    async fn test_refresh_route() {
        let t = setup_test_app().await;
        t.rig.add_device(2, "Scarlett", 0, "USB Audio");
        let (status, report) = send(&t.app, Method::POST, "/devices/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["devices"].as_array().unwrap().len(), 3);
        assert_eq!(report["envelopes_stored"], 6);
    }
}
