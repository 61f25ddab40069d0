//! Task types: kinds, the state machine and progress snapshots

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Stream rows into the record sink
    Ingest,
    /// Write a PII-masked copy of a tabular file
    Mask,
    /// Cut a file into size-bounded parts and archive them
    Split,
}

impl TaskKind {
    /// File suffixes (lower-case, with dot) this kind can process
    pub fn accepted_suffixes(&self) -> &'static [&'static str] {
        match self {
            TaskKind::Ingest | TaskKind::Mask => &[".csv", ".xlsx"],
            TaskKind::Split => &[".txt", ".pdf"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Ingest => "ingest",
            TaskKind::Mask => "mask",
            TaskKind::Split => "split",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingest" => Ok(TaskKind::Ingest),
            "mask" | "desensitize" => Ok(TaskKind::Mask),
            "split" => Ok(TaskKind::Split),
            other => Err(format!("unknown processing kind: {}", other)),
        }
    }
}

/// Task state machine
///
/// `PENDING -> PROGRESS -> SUCCESS | FAILURE`, and `REVOKED` from either
/// non-terminal state. `PROGRESS -> PROGRESS` is how progress updates land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Progress,
    Success,
    Failure,
    Revoked,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure | TaskState::Revoked)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Progress) | (Pending, Revoked) => true,
            (Progress, Progress | Success | Failure | Revoked) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Progress => "PROGRESS",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot, also the payload broadcast on the progress channel
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub current: u64,
    pub total: u64,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
        }
    }
}

/// What a successful algorithm run reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub current: u64,
    pub total: u64,
    pub message: String,
    /// File name (relative to the output directory) of the produced artifact
    pub output_file: Option<String>,
}

impl TaskOutcome {
    pub fn completed(total: u64, output_file: Option<String>) -> Self {
        Self {
            current: total,
            total,
            message: "completed".to_string(),
            output_file,
        }
    }

    pub fn no_rows() -> Self {
        Self {
            current: 0,
            total: 0,
            message: "no rows".to_string(),
            output_file: None,
        }
    }
}

/// Task record as held by the task store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub kind: TaskKind,
    pub state: TaskState,
    /// Latest progress; `None` until the first checkpoint
    pub progress: Option<ProgressEvent>,
    pub output_file: Option<String>,
    /// Error description for FAILURE
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: Uuid, kind: TaskKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            state: TaskState::Pending,
            progress: None,
            output_file: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status view returned to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

impl From<&TaskRecord> for TaskStatus {
    fn from(record: &TaskRecord) -> Self {
        let (current, total, progress_message) = match &record.progress {
            Some(p) => (Some(p.current), Some(p.total), Some(p.message.clone())),
            None => (None, None, None),
        };

        let message = match record.state {
            TaskState::Pending => Some("queued".to_string()),
            TaskState::Failure => record.error.clone(),
            TaskState::Revoked => Some("revoked".to_string()),
            TaskState::Progress | TaskState::Success => progress_message,
        };

        let output_file = match record.state {
            TaskState::Success => record.output_file.clone(),
            _ => None,
        };

        Self {
            task_id: record.id.to_string(),
            state: record.state,
            current,
            total,
            message,
            output_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use TaskState::*;
        assert!(Pending.can_transition_to(Progress));
        assert!(Pending.can_transition_to(Revoked));
        assert!(Progress.can_transition_to(Progress));
        assert!(Progress.can_transition_to(Success));
        assert!(Progress.can_transition_to(Revoked));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Pending.can_transition_to(Failure));

        for terminal in [Success, Failure, Revoked] {
            assert!(terminal.is_terminal());
            for next in [Pending, Progress, Success, Failure, Revoked] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("split".parse::<TaskKind>().unwrap(), TaskKind::Split);
        assert_eq!("Desensitize".parse::<TaskKind>().unwrap(), TaskKind::Mask);
        assert!("compile".parse::<TaskKind>().is_err());
        assert_eq!(serde_json::to_string(&TaskState::Progress).unwrap(), "\"PROGRESS\"");
    }

    #[test]
    fn test_status_view_hides_output_until_success() {
        let mut record = TaskRecord::new(Uuid::new_v4(), TaskKind::Split);
        record.output_file = Some("x_split.zip".to_string());
        record.state = TaskState::Progress;
        record.progress = Some(ProgressEvent::new(1, 3, "Writing part 1/3"));

        let status = TaskStatus::from(&record);
        assert_eq!(status.output_file, None);
        assert_eq!(status.current, Some(1));

        record.state = TaskState::Success;
        let status = TaskStatus::from(&record);
        assert_eq!(status.output_file.as_deref(), Some("x_split.zip"));
    }
}
