use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{config::ScanOptions, error::ScanError, orchestrator::ScanOrchestrator};

#[derive(Clone)]
pub struct AppState {
    orchestrator: ScanOrchestrator,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub range: String,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub range: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelResponse {
    scan_id: Uuid,
    cancelled: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error_code: &'static str,
    message: String,
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = match &self {
            ScanError::ScanNotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_input_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error_code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(orchestrator: ScanOrchestrator) -> Router {
    let state = AppState { orchestrator };
    let api = Router::new()
        .route("/scans", post(post_scan).get(list_scans))
        .route("/scans/{id}", get(get_scan))
        .route("/scans/{id}/cancel", post(cancel_scan))
        .route("/ranges/preview", post(preview_range))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(bind: SocketAddr, orchestrator: ScanOrchestrator) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn scan_id(raw: &str) -> Result<Uuid, ScanError> {
    raw.parse()
        .map_err(|_| ScanError::ScanNotFound(raw.to_string()))
}

async fn post_scan(
    State(app): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, ScanError> {
    let handle = app.orchestrator.start_scan(&req.range, req.options).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

async fn list_scans(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.orchestrator.list_active_scans().await)
}

async fn get_scan(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScanError> {
    let snapshot = app.orchestrator.get_scan_status(scan_id(&id)?).await?;
    Ok(Json(snapshot))
}

async fn cancel_scan(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScanError> {
    let id = scan_id(&id)?;
    let cancelled = app.orchestrator.cancel_scan(id).await?;
    Ok(Json(CancelResponse {
        scan_id: id,
        cancelled,
    }))
}

async fn preview_range(
    State(app): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> Result<impl IntoResponse, ScanError> {
    Ok(Json(app.orchestrator.test_range_parsing(&req.range)?))
}
