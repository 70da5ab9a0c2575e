//! HTTP handlers. Pure protocol translation onto the tracker.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use parley_core::wire::TrackerResponse;
use parley_services::TrackerClient;

#[derive(Clone)]
pub struct ApiState {
    pub tracker: TrackerClient,
}

impl ApiState {
    pub fn new(tracker: TrackerClient) -> Self {
        Self { tracker }
    }
}

// ── Forwarding ───────────────────────────────────────────────────────────────

/// Tag `body` with `method`, send it to the tracker, return its reply
/// unchanged. Bridge-side failures use the tracker's error shape.
pub async fn forward(state: &ApiState, method: &str, body: &str) -> Value {
    let mut document = match parse_body(body) {
        Ok(d) => d,
        Err(message) => return error_value(message),
    };
    document.insert("method".to_string(), Value::String(method.to_string()));

    match state.tracker.send_value(&Value::Object(document)).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(method, error = %e, "tracker forward failed");
            error_value(e.to_string())
        }
    }
}

/// Empty bodies count as `{}`.
fn parse_body(body: &str) -> Result<Map<String, Value>, String> {
    if body.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("Request body must be a JSON object".to_string()),
        Err(e) => Err(format!("Invalid JSON: {e}")),
    }
}

fn error_value(message: impl Into<String>) -> Value {
    serde_json::to_value(TrackerResponse::error(message))
        .unwrap_or_else(|_| json!({ "status": "error" }))
}

pub async fn handle_register_peer(State(state): State<ApiState>, body: String) -> Json<Value> {
    Json(forward(&state, "register", &body).await)
}

pub async fn handle_get_peers(State(state): State<ApiState>, body: String) -> Json<Value> {
    Json(forward(&state, "get_peers", &body).await)
}

pub async fn handle_join_channel(State(state): State<ApiState>, body: String) -> Json<Value> {
    Json(forward(&state, "join_channel", &body).await)
}

pub async fn handle_leave_channel(State(state): State<ApiState>, body: String) -> Json<Value> {
    Json(forward(&state, "leave_channel", &body).await)
}

pub async fn handle_get_channels(State(state): State<ApiState>, body: String) -> Json<Value> {
    Json(forward(&state, "get_channels", &body).await)
}

pub async fn handle_logout(State(state): State<ApiState>, body: String) -> Json<Value> {
    Json(forward(&state, "logout", &body).await)
}

// ── /login ───────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Placeholder credential check: any non-empty username and password pass
/// and receive `token_<username>`. Nothing downstream verifies the token.
pub async fn handle_login(body: String) -> Json<Value> {
    let login: LoginRequest = match parse_body(&body) {
        Ok(map) => serde_json::from_value(Value::Object(map)).unwrap_or_default(),
        Err(message) => return Json(error_value(message)),
    };

    if login.username.is_empty() || login.password.is_empty() {
        return Json(error_value("Invalid credentials"));
    }

    tracing::info!(username = %login.username, "login");
    Json(json!({
        "status": "success",
        "message": "Login successful",
        "username": login.username,
        "token": format!("token_{}", login.username),
    }))
}

// ── /health ──────────────────────────────────────────────────────────────────

pub async fn handle_health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "message": "Parley bridge is running",
        "tracker": state.tracker.addr(),
    }))
}
