//! Assistant allocation: least-loaded auto-assignment, administrator
//! reassignment, and per-assistant progress reporting

use serde::Serialize;
use uuid::Uuid;

use crate::delegation::task::{DelegatedTask, TaskStatus};
use crate::error::{AppError, Result};
use crate::models::{Account, Role};
use crate::store::Store;

/// Per-status aggregate for an assistant's workload
#[derive(Debug, Clone, Serialize)]
pub struct StatusStat {
    pub status: TaskStatus,
    pub count: i64,
    /// Mean seconds from delegation to completion, over tasks that have
    /// left pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_completion_secs: Option<f64>,
}

/// An assistant's tasks plus aggregate statistics
#[derive(Debug, Serialize)]
pub struct AssistantProgress {
    pub tasks: Vec<DelegatedTask>,
    pub stats: Vec<StatusStat>,
}

/// Binds each subscriber to exactly one assistant
#[derive(Clone)]
pub struct AllocationEngine {
    store: Store,
}

impl AllocationEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Assign the assistant with the fewest pending tasks to the
    /// subscriber, falling back to an administrator account when no
    /// assistant exists.
    pub async fn auto_assign(&self, subscriber_id: Uuid) -> Result<Account> {
        let assistant = self.store.auto_assign_assistant(subscriber_id).await?;
        tracing::info!(
            subscriber = %subscriber_id,
            assistant = %assistant.id,
            "Auto-assigned assistant"
        );
        Ok(assistant)
    }

    /// Move the subscriber and their entire task history to a new
    /// assistant. Administrator-driven; the caller enforces the role.
    pub async fn reassign(
        &self,
        subscriber_id: Uuid,
        new_assistant_id: Uuid,
    ) -> Result<(Account, Account)> {
        let subscriber = self.store.get_account(subscriber_id).await?;
        if subscriber.role != Role::Subscriber {
            return Err(AppError::Validation(format!(
                "Account {} is not a subscriber",
                subscriber_id
            )));
        }

        let assistant = self.store.get_account(new_assistant_id).await?;
        if assistant.role == Role::Subscriber {
            return Err(AppError::Validation(format!(
                "Account {} cannot hold delegated work",
                new_assistant_id
            )));
        }

        let moved = self
            .store
            .reassign_subscriber(subscriber_id, new_assistant_id)
            .await?;
        tracing::info!(
            subscriber = %subscriber_id,
            assistant = %new_assistant_id,
            moved,
            "Reassigned subscriber"
        );

        let subscriber = self.store.get_account(subscriber_id).await?;
        Ok((subscriber, assistant))
    }

    /// All tasks held by the assistant plus per-status aggregates
    pub async fn progress(&self, assistant_id: Uuid) -> Result<AssistantProgress> {
        // Surfaces not-found for unknown assistants
        self.store.get_account(assistant_id).await?;

        let tasks = self.store.list_tasks_for_assistant(assistant_id).await?;
        let stats = self.store.assistant_status_stats(assistant_id).await?;
        Ok(AssistantProgress { tasks, stats })
    }
}
