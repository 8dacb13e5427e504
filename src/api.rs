//! REST API server for the agent router
//!
//! Thin wrapper: every request becomes one orchestrator turn.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::agent::Orchestrator;
use crate::models::AgentRoute;

/// =============================
/// Request / Response Models
/// =============================

fn default_thread_id() -> String {
    "1".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default = "default_thread_id")]
    pub thread_id: String,
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub response: String,
    pub thread_id: String,
    pub intent: Option<AgentRoute>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reference: Uuid,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
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
/// Ask Endpoint
/// =============================

async fn ask(
    State(state): State<ApiState>,
    Json(req): Json<AskRequest>,
) -> Result<(StatusCode, Json<AskResponse>), (StatusCode, Json<ErrorResponse>)> {
    info!(thread_id = %req.thread_id, "Received ask request");

    let reply = state.orchestrator.respond(&req.thread_id, &req.query).await;

    match reply.reference {
        Some(reference) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: reply.response,
                reference,
            }),
        )),
        None => Ok((
            StatusCode::CREATED,
            Json(AskResponse {
                response: reply.response,
                thread_id: reply.thread_id,
                intent: reply.intent,
            }),
        )),
    }
}

/// =============================
/// Session Endpoint
/// =============================

async fn delete_session(
    State(state): State<ApiState>,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    match state.orchestrator.end_session(&thread_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Ok(StatusCode::NOT_FOUND),
        Err(e) => {
            let reference = Uuid::new_v4();
            tracing::error!(%thread_id, %reference, error = %e, "Session deletion failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: crate::agent::GENERIC_ERROR.to_string(),
                    reference,
                }),
            ))
        }
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/ask", post(ask))
        .route("/sessions/:thread_id", delete(delete_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
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

    axum::serve(listener, router).await?;

    Ok(())
}
