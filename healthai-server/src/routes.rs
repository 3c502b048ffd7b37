//! HTTP handlers: health, welcome, and model upload/download.

use std::sync::Arc;

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::models::{FALLBACK_MODEL_NAME, ModelStore, StoreError};

/// Multipart field carrying the uploaded model.
const MODEL_FIELD: &str = "model";

/// Errors surfaced to HTTP clients as `{"error": ...}` bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The upload had no `model` field.
    #[error("No model file provided")]
    MissingModelFile,
    /// No model is stored under the requested name.
    #[error("Model not found")]
    ModelNotFound,
    /// The multipart body could not be read.
    #[error("invalid upload: {0}")]
    Multipart(#[from] MultipartError),
    /// The model store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::MissingModelFile => StatusCode::BAD_REQUEST,
            Self::ModelNotFound => StatusCode::NOT_FOUND,
            Self::Multipart(e) => e.status(),
            Self::Store(e) => {
                tracing::error!(error = %e, "model store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `GET /healthz`
pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// `GET /`
pub async fn index() -> Json<Value> {
    Json(json!({ "message": "Welcome to the HealthAI API!" }))
}

/// `POST /models`: stores the multipart field `model` on disk.
///
/// # Errors
///
/// Returns [`ApiError::MissingModelFile`] when no `model` field is present,
/// or the underlying multipart/store error.
pub async fn upload_model(
    State(models): State<Arc<ModelStore>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(MODEL_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or(FALLBACK_MODEL_NAME)
            .to_string();
        let bytes = field.bytes().await?;
        let name = models.store(&file_name, &bytes).await?;

        return Ok((
            StatusCode::CREATED,
            Json(json!({ "message": format!("Model saved: {name}") })),
        ));
    }

    Err(ApiError::MissingModelFile)
}

/// `GET /models/{model_name}`: streams a stored model back as raw bytes.
///
/// # Errors
///
/// Returns [`ApiError::ModelNotFound`] if nothing is stored under the name.
pub async fn download_model(
    State(models): State<Arc<ModelStore>>,
    Path(model_name): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = models
        .retrieve(&model_name)
        .await?
        .ok_or(ApiError::ModelNotFound)?;

    tracing::debug!(model = %model_name, size = bytes.len(), "serving model");
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}
