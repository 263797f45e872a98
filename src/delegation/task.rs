//! Delegated task model and status transitions
//!
//! Represents one outsourced job application and its lifecycle record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a delegated task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Delegated, not yet acted on by the assistant
    Pending,
    /// The assistant submitted the application
    Applied,
    /// The assistant could not or would not apply
    Rejected,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Applied => "applied",
            TaskStatus::Rejected => "rejected",
        }
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Applied | TaskStatus::Rejected)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "applied" => Ok(TaskStatus::Applied),
            "rejected" => Ok(TaskStatus::Rejected),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Proof-of-completion record attached by the assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofDocument {
    pub filename: String,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// One entry in a task's ordered status history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub actor_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A delegated job application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedTask {
    pub id: Uuid,
    pub title: String,
    pub company: String,
    pub link: String,
    pub description: String,
    /// Owning subscriber
    pub subscriber_id: Uuid,
    /// Assistant holding the task; equals the subscriber's assigned
    /// assistant at creation time
    pub assistant_id: Uuid,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<ProofDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DelegatedTask {
    pub fn new(
        title: impl Into<String>,
        company: impl Into<String>,
        link: impl Into<String>,
        description: impl Into<String>,
        subscriber_id: Uuid,
        assistant_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            company: company.into(),
            link: link.into(),
            description: description.into(),
            subscriber_id,
            assistant_id,
            status: TaskStatus::Pending,
            proof: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the task forward to a terminal status.
    ///
    /// Transitions are monotonic: only pending -> {applied, rejected}.
    pub fn transition_to(&mut self, status: TaskStatus) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "Cannot update task in terminal status: {}",
                self.status.as_str()
            ));
        }
        if status == TaskStatus::Pending {
            return Err("Task is already pending".to_string());
        }
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Attach a proof-of-completion record
    pub fn attach_proof(&mut self, filename: impl Into<String>, path: impl Into<String>) {
        let now = Utc::now();
        self.proof = Some(ProofDocument {
            filename: filename.into(),
            path: path.into(),
            uploaded_at: now,
        });
        self.updated_at = now;
    }
}
