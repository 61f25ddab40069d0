//! Artifact routes
//!
//! Serves task outputs and exports ingested records.
//!
//! Endpoints:
//! - GET /download/:task_id - Artifact produced by a task
//! - GET /export?task_id= - Ingested records as CSV

use std::path::{Path as FsPath, PathBuf};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::processing::{mask_file, split};
use crate::state::AppState;
use crate::tasks::TaskState;

/// Create the files router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/download/:task_id", get(download))
        .route("/export", get(export_records))
}

// ============================================================================
// Download
// ============================================================================

/// GET /download/:task_id
async fn download(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response> {
    let id = Uuid::parse_str(&task_id).map_err(|_| not_found(&task_id))?;

    let recorded = state
        .engine()
        .record(id)
        .filter(|record| record.state == TaskState::Success)
        .and_then(|record| record.output_file);

    let path = resolve_artifact(&state.config().storage.output_dir, id, recorded.as_deref())
        .ok_or_else(|| not_found(&task_id))?;

    let bytes = tokio::fs::read(&path).await?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| task_id.clone());
    let content_type = mime_guess::from_path(&path).first_or_octet_stream();

    tracing::debug!(task_id = %id, path = %path.display(), "Serving artifact");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Locate the artifact of a task.
///
/// The recorded output name wins; without it (task unknown, expired or
/// unfinished) the names every file-producing task uses are tried in order.
pub fn resolve_artifact(output_dir: &FsPath, task_id: Uuid, recorded: Option<&str>) -> Option<PathBuf> {
    let id = task_id.to_string();
    let fallbacks = [
        split::archive_name(&id),
        mask_file::output_name(task_id, ".csv"),
        mask_file::output_name(task_id, ".xlsx"),
    ];

    recorded
        .filter(|name| is_plain_file_name(name))
        .map(str::to_string)
        .into_iter()
        .chain(fallbacks)
        .map(|name| output_dir.join(name))
        .find(|path| path.is_file())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub task_id: Option<String>,
}

/// GET /export?task_id=
async fn export_records(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let task_id = query.task_id.filter(|t| !t.trim().is_empty());
    let records = state.records().list(task_id.as_deref()).await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["id", "task_id", "row_number", "payload"])
        .map_err(|e| AppError::Internal(e.to_string()))?;
    for record in &records {
        writer
            .write_record([
                record.id.to_string(),
                record.task_id.clone(),
                record.row_number.to_string(),
                record.payload.clone(),
            ])
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let filename = match &task_id {
        Some(id) => format!("export_{}.csv", id),
        None => "export_all.csv".to_string(),
    };

    tracing::debug!(rows = records.len(), file_name = %filename, "Exporting records");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", filename),
        )
        .body(Body::from(body))
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn not_found(task_id: &str) -> AppError {
    AppError::NotFound(format!("No output for task {}", task_id))
}
