//! HTTP boundary for the browser UI and the classifier.
//!
//! The webcam page posts detections here and the settings panel reads and
//! writes the OBS connection settings. Default bind: 127.0.0.1:8126.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{SettingsCache, CONNECTION_KEY};
use crate::config::ConnectionSettings;
use crate::expression::Expression;
use crate::obs::{ConnectionState, ControllerError, ExpressionSceneController, ObsConnection};

/// Shared state for API handlers
pub struct ApiState {
    pub connection: Arc<ObsConnection>,
    pub controller: Arc<ExpressionSceneController>,
    pub cache: Arc<SettingsCache>,
    /// Hands new settings to the connection supervisor, which reconnects.
    pub reconnect_tx: mpsc::Sender<ConnectionSettings>,
}

/// Response for GET /api/status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connection: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_expression: Option<String>,
    pub ready: bool,
}

/// Request body for POST /api/detection
#[derive(Debug, Deserialize)]
pub struct DetectionRequest {
    pub label: String,
    pub confidence: f64,
}

/// API error response
#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/detection", post(post_detection))
        .route("/api/expressions", get(list_expressions))
        .route("/api/health", get(health_check))
        .with_state(state)
}

/// GET /api/status - Connection state and current expression
async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let connection_state = state.connection.state();
    let detail = match &connection_state {
        ConnectionState::Failed(reason) => Some(reason.clone()),
        _ => None,
    };

    Json(StatusResponse {
        connection: connection_state.as_str(),
        detail,
        current_expression: state
            .controller
            .current_expression()
            .map(|e| e.to_string()),
        ready: state.controller.is_ready(),
    })
}

/// GET /api/settings - Last-applied connection settings (password omitted)
async fn get_settings(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let settings: ConnectionSettings = state.cache.get(CONNECTION_KEY).unwrap_or_default();
    Json(serde_json::json!({
        "host": settings.host,
        "port": settings.port,
        "has_password": settings.password.is_some(),
    }))
}

/// PUT /api/settings - Persist new connection settings and reconnect
async fn put_settings(
    State(state): State<Arc<ApiState>>,
    Json(settings): Json<ConnectionSettings>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if settings.host.is_empty() {
        return Err(ApiError {
            error: "host cannot be empty".to_string(),
        });
    }

    if let Err(e) = state.cache.set(CONNECTION_KEY, &settings).await {
        warn!("Failed to persist connection settings: {:#}", e);
    }

    state.reconnect_tx.send(settings).await.map_err(|_| ApiError {
        error: "connection supervisor is not running".to_string(),
    })?;

    info!("New connection settings applied; reconnecting");
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// POST /api/detection - Classifier input (one call per detection cycle)
async fn post_detection(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<DetectionRequest>,
) -> Json<serde_json::Value> {
    match state
        .controller
        .on_expression_detected(&req.label, req.confidence)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "ok": true })),
        // Classifier noise is expected; report it without a client error.
        Err(ControllerError::UnknownExpression(label)) => {
            debug!("Ignoring detection with unknown label '{}'", label);
            Json(serde_json::json!({ "ok": false, "ignored": label }))
        },
        Err(e) => {
            warn!("Detection not applied: {}", e);
            Json(serde_json::json!({ "ok": false, "error": e.to_string() }))
        },
    }
}

/// GET /api/expressions - The expression vocabulary for the UI
async fn list_expressions() -> Json<Vec<&'static str>> {
    Json(Expression::ALL.iter().map(|e| e.as_str()).collect())
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Start the API server
pub async fn start_server(state: Arc<ApiState>, listen: &str) -> Result<()> {
    let router = build_router(state);

    info!("Starting API server on http://{}", listen);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind API server on {}", listen))?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
