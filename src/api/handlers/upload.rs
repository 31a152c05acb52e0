use crate::AppState;
use crate::api::error::AppError;
use crate::error::IngestError;
use crate::models::FileMetadata;
use axum::{
    Json,
    extract::{ConnectInfo, Multipart, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode},
};
use futures::TryStreamExt;
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub files: Vec<FileMetadata>,
}

/// Rate-limit key: the peer IP, or the first `x-forwarded-for` hop when the
/// service sits behind a trusted proxy.
fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    let forwarded = trust_forwarded_for
        .then(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .flatten();

    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::Ingest(IngestError::RequestTooLarge)
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// Body-limit failures surface mid-field too; keep them distinguishable from aborts.
fn field_stream_error(e: MultipartError) -> io::Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        io::Error::new(io::ErrorKind::FileTooLarge, e.body_text())
    } else {
        io::Error::other(e.body_text())
    }
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(
        content = Multipart,
        content_type = "multipart/form-data",
        description = "One or more file parts named resume, image, audio or document"
    ),
    responses(
        (status = 200, description = "All files accepted", body = UploadResponse),
        (status = 400, description = "Rejected: unsafe name, bad content, unexpected field"),
        (status = 413, description = "File, batch or request body exceeds its size limit"),
        (status = 415, description = "Extension or MIME type not allowed for the category"),
        (status = 422, description = "Malicious content detected"),
        (status = 429, description = "Upload rate limit exceeded"),
        (status = 507, description = "Insufficient storage")
    ),
    tag = "uploads"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let key = client_key(
        &headers,
        connect_info.map(|ConnectInfo(addr)| addr),
        state.config.trust_forwarded_for,
    );
    state.limiter.check(&key).await?;

    let mut batch = state
        .ingest
        .begin_batch(state.batch_limits.clone())
        .await?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let reader = StreamReader::new(field.map_err(field_stream_error));
        tokio::pin!(reader);
        batch
            .accept(&field_name, &file_name, &content_type, reader)
            .await?;
    }

    if batch.is_empty() {
        return Err(AppError::BadRequest("No file provided".to_string()));
    }

    let files = batch.commit().await?;
    Ok(Json(UploadResponse { files }))
}
