//! Upload Routes
//!
//! Direct uploads and the resumable chunked upload protocol. A finished upload
//! is submitted to the task engine for the processing kind named in the path
//! (`ingest`, `mask`/`desensitize`, `split`).
//!
//! Endpoints:
//! - POST /upload - Direct upload of a tabular file for ingestion
//! - POST /upload/:kind - Direct upload for any processing kind
//! - POST /upload/:kind/init - Open a chunked upload session
//! - POST /upload/:kind/chunk - Append the next chunk (multipart)
//! - POST /upload/:kind/complete - Finish the session and submit the task
//! - DELETE /upload/:kind/:upload_id - Abandon a session

use std::path::PathBuf;

use axum::{
    extract::{multipart::Field, multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::tasks::TaskKind;
use crate::upload::{
    stored_file_name, validate_filename, ChunkResponse, CompleteRequest, InitRequest,
    InitResponse, SessionManager, UploadError, MAX_CHUNK_SIZE, STREAM_BUFFER_SIZE,
};

/// Response carrying the ID of a submitted task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmitted {
    pub task_id: String,
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        // Direct uploads are streamed to disk, chunks are buffered
        .route(
            "/upload",
            post(direct_upload_ingest).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/upload/:kind",
            post(direct_upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/upload/:kind/init", post(init_upload))
        .route(
            "/upload/:kind/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(MAX_CHUNK_SIZE)),
        )
        .route("/upload/:kind/complete", post(complete_upload))
        .route("/upload/:kind/:upload_id", delete(abort_upload))
}

// ============================================================================
// Direct Upload
// ============================================================================

/// POST /upload
async fn direct_upload_ingest(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TaskSubmitted>> {
    accept_direct(&state, TaskKind::Ingest, multipart).await
}

/// POST /upload/:kind
///
/// The file is read from the `file` field and streamed to disk.
async fn direct_upload(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    multipart: Multipart,
) -> Result<Json<TaskSubmitted>> {
    let kind = parse_kind(&kind)?;
    accept_direct(&state, kind, multipart).await
}

async fn accept_direct(state: &AppState, kind: TaskKind, mut multipart: Multipart) -> Result<Json<TaskSubmitted>> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| UploadError::InvalidFileName("missing filename".to_string()))?;
        validate_filename(&filename, kind)?;

        let path = stream_to_disk(&state.config().storage.upload_dir, &filename, field).await?;
        let task_id = state.engine().submit(kind, path);

        return Ok(Json(TaskSubmitted {
            task_id: task_id.to_string(),
        }));
    }

    Err(AppError::BadRequest("missing file field".to_string()))
}

/// Write a multipart field to the upload directory under a unique name
async fn stream_to_disk(dir: &std::path::Path, filename: &str, mut field: Field<'_>) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(stored_file_name(Uuid::new_v4(), filename));

    let file = tokio::fs::File::create(&path).await?;
    let mut writer = BufWriter::with_capacity(STREAM_BUFFER_SIZE, file);

    let written = match copy_field(&mut field, &mut writer).await {
        Ok(written) => written,
        Err(e) => {
            drop(writer);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
    };

    tracing::info!(
        file_name = %filename,
        size = written,
        path = %path.display(),
        "Direct upload stored"
    );

    Ok(path)
}

async fn copy_field(field: &mut Field<'_>, writer: &mut BufWriter<tokio::fs::File>) -> Result<u64> {
    let mut written: u64 = 0;
    while let Some(bytes) = field.chunk().await.map_err(bad_multipart)? {
        writer.write_all(&bytes).await?;
        written += bytes.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

// ============================================================================
// Chunked Upload
// ============================================================================

/// POST /upload/:kind/init
async fn init_upload(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<InitRequest>,
) -> Result<Json<InitResponse>> {
    let kind = parse_kind(&kind)?;
    let session = state.sessions().init(&request.filename, kind).await?;

    Ok(Json(InitResponse {
        upload_id: session.id.to_string(),
    }))
}

/// POST /upload/:kind/chunk
///
/// Multipart fields: `upload_id`, `chunk_index`, `total_chunks`, `file`.
async fn upload_chunk(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ChunkResponse>> {
    let kind = parse_kind(&kind)?;

    let mut upload_id = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut data = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "upload_id" => upload_id = Some(field.text().await.map_err(bad_multipart)?),
            "chunk_index" => {
                let raw = field.text().await.map_err(bad_multipart)?;
                chunk_index = Some(parse_count("chunk_index", &raw)?);
            }
            "total_chunks" => {
                let raw = field.text().await.map_err(bad_multipart)?;
                total_chunks = Some(parse_count("total_chunks", &raw)?);
            }
            "file" => data = Some(field.bytes().await.map_err(bad_multipart)?),
            _ => {}
        }
    }

    let upload_id = upload_id.ok_or_else(|| AppError::BadRequest("missing upload_id".to_string()))?;
    let chunk_index = chunk_index
        .ok_or_else(|| UploadError::InvalidChunkIndex("missing chunk_index".to_string()))?;
    let total_chunks = total_chunks
        .ok_or_else(|| UploadError::InvalidChunkIndex("missing total_chunks".to_string()))?;
    let data = data.ok_or_else(|| AppError::BadRequest("missing file field".to_string()))?;

    let session_id = SessionManager::parse_id(&upload_id)?;
    ensure_kind(&state, session_id, kind).await?;

    let received = state
        .sessions()
        .append_chunk(session_id, chunk_index, total_chunks, &data)
        .await?;

    Ok(Json(ChunkResponse {
        upload_id: session_id.to_string(),
        chunk_index,
        total_chunks,
        received_bytes: received,
    }))
}

/// POST /upload/:kind/complete
async fn complete_upload(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<TaskSubmitted>> {
    let kind = parse_kind(&kind)?;
    let session_id = SessionManager::parse_id(&request.upload_id)?;
    ensure_kind(&state, session_id, kind).await?;

    let (session, path) = state.sessions().complete(session_id).await?;
    let task_id = state.engine().submit(session.kind, path);

    tracing::info!(
        session_id = %session_id,
        task_id = %task_id,
        "Chunked upload submitted"
    );

    Ok(Json(TaskSubmitted {
        task_id: task_id.to_string(),
    }))
}

/// DELETE /upload/:kind/:upload_id
async fn abort_upload(
    State(state): State<AppState>,
    Path((kind, upload_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let kind = parse_kind(&kind)?;
    let session_id = SessionManager::parse_id(&upload_id)?;
    ensure_kind(&state, session_id, kind).await?;

    state.sessions().abort(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_kind(raw: &str) -> Result<TaskKind> {
    raw.parse::<TaskKind>().map_err(AppError::BadRequest)
}

fn parse_count(field: &str, raw: &str) -> std::result::Result<u32, UploadError> {
    raw.trim().parse::<u32>().map_err(|_| {
        UploadError::InvalidChunkIndex(format!("{} must be a non-negative integer, got '{}'", field, raw))
    })
}

/// Reject requests that address a session under a different processing kind
async fn ensure_kind(state: &AppState, session_id: Uuid, requested: TaskKind) -> Result<()> {
    let session = state.sessions().get(session_id).await?;
    if session.kind != requested {
        return Err(UploadError::KindMismatch {
            session: session.kind,
            requested,
        }
        .into());
    }
    Ok(())
}

fn bad_multipart(e: MultipartError) -> AppError {
    tracing::warn!("Failed to read multipart body: {}", e);
    let message = format!("Failed to read upload: {}", e);
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge(message);
    }
    AppError::BadRequest(message)
}
