use crate::config::ApiConfig;
use crate::error::SyncError;
use crate::service::{CloudSyncService, SyncStatus};
use crate::task::Priority;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CloudSyncService>,
}

/// Request to queue a segment
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub local_path: PathBuf,
    pub camera_id: String,
    pub site_id: String,
    /// 1 (normal), 2 (high) or 3 (critical)
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub has_motion: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub destination_key: String,
}

/// Request to upload a segment immediately
#[derive(Debug, Deserialize)]
pub struct ForceSyncRequest {
    pub local_path: PathBuf,
    pub camera_id: String,
    pub site_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForceSyncResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/sync", post(enqueue_segment))
        .route("/api/v1/sync/force", post(force_sync))
        .route("/api/v1/sync/status", get(sync_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cloud-sync-service"
    }))
}

async fn sync_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.service.status())
}

#[instrument(skip(state))]
async fn enqueue_segment(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), (StatusCode, Json<ErrorResponse>)> {
    let destination_key = state
        .service
        .enqueue(
            request.local_path,
            &request.camera_id,
            &request.site_id,
            request.priority,
            request.has_motion,
        )
        .map_err(|e| {
            warn!(error = %e, "Rejected sync request");
            (StatusCode::BAD_REQUEST, Json(error_response(&e)))
        })?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { destination_key })))
}

#[instrument(skip(state))]
async fn force_sync(
    State(state): State<AppState>,
    Json(request): Json<ForceSyncRequest>,
) -> Json<ForceSyncResponse> {
    let success = state
        .service
        .force_sync(request.local_path, &request.camera_id, &request.site_id)
        .await;

    Json(ForceSyncResponse { success })
}

fn error_response(error: &SyncError) -> ErrorResponse {
    let code = match error {
        SyncError::InvalidTask(_) => "INVALID_TASK",
        SyncError::SourceMissing(_) => "SOURCE_MISSING",
        SyncError::DestinationUnavailable(_) => "DESTINATION_UNAVAILABLE",
        SyncError::TransferInterrupted(_) => "TRANSFER_INTERRUPTED",
        SyncError::RetryBudgetExhausted(_) => "RETRY_BUDGET_EXHAUSTED",
    };

    ErrorResponse {
        error: error.to_string(),
        code: code.to_string(),
    }
}

/// Serve the control API until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting control API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
