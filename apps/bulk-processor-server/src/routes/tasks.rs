//! Task observation routes
//!
//! Endpoints:
//! - GET /status/:task_id - Current task status
//! - POST /tasks/:task_id/cancel - Request cancellation
//! - GET /ws/status/:task_id - Live progress over WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::tasks::{ProgressEvent, TaskStatus};

/// Keep-alive ping interval for progress sockets
const PING_INTERVAL_SECS: u64 = 30;

/// Acknowledgment of a cancel request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub task_id: String,
    pub message: String,
}

/// Create the task router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status/:task_id", get(task_status))
        .route("/tasks/:task_id/cancel", post(cancel_task))
        .route("/ws/status/:task_id", get(progress_socket))
}

/// GET /status/:task_id
async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>> {
    let id = Uuid::parse_str(&task_id).map_err(|_| not_found(&task_id))?;
    state
        .engine()
        .status(id)
        .map(Json)
        .ok_or_else(|| not_found(&task_id))
}

/// POST /tasks/:task_id/cancel
///
/// Always acknowledges. Whether the task actually stopped is visible through
/// the status endpoint.
async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<CancelResponse> {
    if let Ok(id) = Uuid::parse_str(&task_id) {
        let revoked = state.engine().cancel(id);
        tracing::debug!(task_id = %id, revoked = revoked, "Cancel requested");
    }

    Json(CancelResponse {
        task_id,
        message: "task cancel signal sent".to_string(),
    })
}

/// GET /ws/status/:task_id
async fn progress_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| stream_progress(socket, state, task_id))
}

async fn stream_progress(socket: WebSocket, state: AppState, task_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let Ok(id) = Uuid::parse_str(&task_id) else {
        let _ = sender.send(Message::Text(not_found_frame(&task_id).into())).await;
        return;
    };

    // Subscribe before reading the snapshot so nothing published in between
    // is lost.
    let mut events = state.engine().subscribe(id);
    let Some(status) = state.engine().status(id) else {
        let _ = sender.send(Message::Text(not_found_frame(&task_id).into())).await;
        return;
    };

    tracing::debug!(task_id = %id, state = %status.state, "Progress socket connected");

    if sender.send(event_frame(&snapshot(&status))).await.is_err() {
        return;
    }
    if status.state.is_terminal() {
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let mut ping_interval =
        tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if sender.send(event_frame(&event)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(task_id = %id, skipped = skipped, "Progress socket lagged");
                    }
                    Err(RecvError::Closed) => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(task_id = %id, error = %e, "Progress socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    tracing::debug!(task_id = %id, "Progress socket disconnected");
}

/// Progress fields of a status, as sent on the live stream
fn snapshot(status: &TaskStatus) -> ProgressEvent {
    ProgressEvent::new(
        status.current.unwrap_or(0),
        status.total.unwrap_or(0),
        status.message.clone().unwrap_or_default(),
    )
}

fn event_frame(event: &ProgressEvent) -> Message {
    Message::Text(serde_json::to_string(event).unwrap_or_default().into())
}

fn not_found_frame(task_id: &str) -> String {
    serde_json::json!({
        "error": format!("Task not found: {}", task_id),
        "code": "NOT_FOUND",
    })
    .to_string()
}

fn not_found(task_id: &str) -> AppError {
    AppError::NotFound(format!("Task not found: {}", task_id))
}
