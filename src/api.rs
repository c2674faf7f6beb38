//! REST API Server for the ETF Strategy Orchestrator
//!
//! Thin HTTP adapter over `Orchestrator::handle_turn`

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::agent::Orchestrator;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TurnRequest {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub message: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Helpers
/// =============================

/// Deterministic v4-shaped UUID for client ids that are not UUIDs
fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>) -> Option<Uuid> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))),
        _ => None,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Turn Endpoint
/// =============================

async fn turn_handler(State(state): State<ApiState>, Json(req): Json<TurnRequest>) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::error("message must not be empty".into())));
    }

    let session_id = parse_or_stable_uuid(req.session_id.as_deref()).unwrap_or_else(Uuid::new_v4);
    let user_id = parse_or_stable_uuid(req.user_id.as_deref());
    info!(session_id = %session_id, user_id = ?user_id, "Received turn request");

    let reply = state
        .orchestrator
        .handle_turn_for_user(session_id, user_id, &req.message)
        .await;

    (StatusCode::OK, Json(ApiResponse::success(reply)))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/v1/turn", post(turn_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
