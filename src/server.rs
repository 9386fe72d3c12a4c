use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Standing, Tally, VoteReceipt, VoteRequest};
use crate::recorder::{RecordError, VoteRecorder};
use crate::store::DocumentStore;

/// Errors reported by the HTTP surface
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or invalid photo in request body")]
    InvalidPhoto,

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server configuration error: GITHUB_TOKEN not set")]
    MissingCredential,

    #[error("Failed to record vote: {0}")]
    Store(String),

    #[error("Vote not recorded, the tally is busy; try again")]
    Busy,
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidPhoto | ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MissingCredential | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPhoto => "invalid_photo",
            ApiError::MalformedBody(_) => "malformed_body",
            ApiError::MethodNotAllowed => "method_not_allowed",
            ApiError::NotFound(_) => "not_found",
            ApiError::MissingCredential => "missing_credential",
            ApiError::Store(_) => "store_failure",
            ApiError::Busy => "retry_exhausted",
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        if err.is_missing_credential() {
            return ApiError::MissingCredential;
        }
        match err {
            RecordError::Exhausted { .. } => ApiError::Busy,
            other => ApiError::Store(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.to_string(),
            code: self.code().to_string(),
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Build the vote service router
pub fn router<S>(recorder: Arc<VoteRecorder<S>>) -> Router
where
    S: DocumentStore + 'static,
{
    Router::new()
        .route("/vote", post(record_vote::<S>))
        .route("/votes", get(current_votes::<S>))
        .route("/leaderboard", get(leaderboard::<S>))
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(recorder)
}

/// Serve the router until the process is stopped
pub async fn serve(bind: &str, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Vote endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn record_vote<S: DocumentStore>(
    State(recorder): State<Arc<VoteRecorder<S>>>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteReceipt>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejected vote body");
        ApiError::MalformedBody(rejection.body_text())
    })?;

    let key = request.validated_key().ok_or_else(|| {
        warn!(photo = ?request.photo, "Rejected vote without a usable photo key");
        ApiError::InvalidPhoto
    })?;

    let recorded = recorder.record(key).await?;

    Ok(Json(VoteReceipt {
        id: Uuid::new_v4(),
        photo: recorded.key,
        votes: recorded.votes,
        attempts: recorded.attempts,
        created_document: recorded.created_document,
        recorded_at: Utc::now(),
    }))
}

async fn current_votes<S: DocumentStore>(
    State(recorder): State<Arc<VoteRecorder<S>>>,
) -> Result<Json<Tally>, ApiError> {
    Ok(Json(recorder.snapshot().await?))
}

async fn leaderboard<S: DocumentStore>(
    State(recorder): State<Arc<VoteRecorder<S>>>,
) -> Result<Json<Vec<Standing>>, ApiError> {
    let tally = recorder.snapshot().await?;
    Ok(Json(tally.ranked()))
}

async fn method_not_allowed(method: Method, uri: OriginalUri) -> ApiError {
    warn!(%method, path = uri.0.path(), "Method not allowed");
    ApiError::MethodNotAllowed
}

async fn not_found(uri: OriginalUri) -> ApiError {
    ApiError::NotFound(uri.0.path().to_string())
}
