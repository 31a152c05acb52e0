use crate::error::IngestError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Bad Request: {0}")]
    BadRequest(String),
}

pub fn status_for(error: &IngestError) -> StatusCode {
    match error {
        IngestError::FileTooLarge { .. }
        | IngestError::BatchTooLarge { .. }
        | IngestError::RequestTooLarge => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        IngestError::InvalidExtension { .. } | IngestError::InvalidMimeType { .. } => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        IngestError::MaliciousContent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        IngestError::InsufficientStorage { .. } => StatusCode::INSUFFICIENT_STORAGE,
        IngestError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        IngestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        IngestError::UnknownCategory(_)
        | IngestError::TooManyFiles { .. }
        | IngestError::UnexpectedField(_)
        | IngestError::InvalidContent { .. }
        | IngestError::EmptyFile
        | IngestError::FilenameUnsafe(_)
        | IngestError::Aborted(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Ingest(e) => {
                let status = status_for(&e);
                if e.is_rejection() {
                    (status, e.code(), e.to_string())
                } else {
                    tracing::error!("Internal error: {}", e);
                    (status, e.code(), "Internal Server Error".to_string())
                }
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BadRequest", msg),
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
