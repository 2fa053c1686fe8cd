use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use nestkv_core::store::network::{CommitRequest, KvNode, RemoteRead};
use nestkv_core::Error;

use crate::wire::{CommitBody, ErrorBody, ReadBody, ReadResponse, VersionResponse};

#[derive(Debug, Clone)]
pub struct AppState {
    pub node: Arc<KvNode>,
    /// Added before every answer, to exercise pipelined clients.
    pub latency: Duration,
}

impl AppState {
    pub fn new(node: Arc<KvNode>) -> Self {
        Self {
            node,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/read_version", post(read_version))
        .route("/read", post(read))
        .route("/commit", post(commit))
        .with_state(state)
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody::from_error(&self.0);
        let status = if body.is_conflict() {
            StatusCode::CONFLICT
        } else if matches!(self.0, Error::Remote(_) | Error::Codec(_)) {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::warn!(error = %self.0, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn read_version(State(state): State<AppState>) -> Json<VersionResponse> {
    state.delay().await;
    Json(VersionResponse {
        version: state.node.read_version(),
    })
}

async fn read(
    State(state): State<AppState>,
    Json(body): Json<ReadBody>,
) -> Result<Json<ReadResponse>, ApiError> {
    let request = RemoteRead::try_from(body)?;
    state.delay().await;
    let rows = state.node.read(&request)?;
    Ok(Json(ReadResponse::from(rows.as_slice())))
}

async fn commit(
    State(state): State<AppState>,
    Json(body): Json<CommitBody>,
) -> Result<Json<VersionResponse>, ApiError> {
    let request = CommitRequest::try_from(body)?;
    state.delay().await;
    let version = state.node.commit(&request)?;
    tracing::debug!(version, mutations = request.mutations.len(), "committed");
    Ok(Json(VersionResponse { version }))
}
