//! Delegation manager coordinating the ledger, the allocation engine,
//! and the task state machine
//!
//! Handlers authenticate and authorize before calling in; the manager
//! owns the business rules: who may move a task, when a credit is
//! consumed, and what a completed task mirrors outward.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::allocation::{AllocationEngine, AssistantProgress};
use super::ledger::{self, EntitlementSnapshot};
use super::task::{DelegatedTask, TaskStatus};
use crate::error::{AppError, Result};
use crate::models::{Account, AccountSummary, DelegateRequest, PlanTier, ProofUpload, Role};
use crate::store::Store;

/// A created task with its subscriber and assistant resolved
#[derive(Debug, Serialize)]
pub struct TaskDetails {
    pub task: DelegatedTask,
    pub subscriber: AccountSummary,
    pub assistant: AccountSummary,
}

/// Coordinates delegation operations over the shared store
#[derive(Clone)]
pub struct DelegationManager {
    store: Store,
    allocation: AllocationEngine,
}

impl DelegationManager {
    pub fn new(store: Store) -> Self {
        let allocation = AllocationEngine::new(store.clone());
        Self { store, allocation }
    }

    /// Purchase a plan: the tier grant replaces the credit balance, a
    /// one-month subscription window opens, and an unassigned subscriber
    /// gets an assistant attached.
    pub async fn purchase_plan(
        &self,
        account_id: Uuid,
        tier: PlanTier,
    ) -> Result<EntitlementSnapshot> {
        let now = Utc::now();
        let (start, end) = ledger::subscription_window(now)?;
        let account = self
            .store
            .set_entitlement(account_id, tier, ledger::credit_grant(tier), start, end)
            .await?;

        let account = if account.assigned_assistant.is_none() {
            self.allocation.auto_assign(account.id).await?;
            self.store.get_account(account.id).await?
        } else {
            account
        };

        tracing::info!(account = %account.id, plan = tier.as_str(), "Plan purchased");
        Ok(EntitlementSnapshot::from_account(&account))
    }

    /// Current entitlement view of an account
    pub async fn entitlement(&self, account_id: Uuid) -> Result<EntitlementSnapshot> {
        let account = self.store.get_account(account_id).await?;
        Ok(EntitlementSnapshot::from_account(&account))
    }

    /// Delegate one application: resolve the subscriber's assistant
    /// (assigning one on first delegation), then charge and create the
    /// task as a single atomic unit.
    pub async fn delegate(
        &self,
        subscriber: &Account,
        request: DelegateRequest,
    ) -> Result<TaskDetails> {
        let subscriber = self.store.get_account(subscriber.id).await?;

        let assistant_id = match subscriber.assigned_assistant {
            Some(id) => id,
            None => match self.allocation.auto_assign(subscriber.id).await {
                Ok(assistant) => assistant.id,
                Err(e) => {
                    tracing::error!(subscriber = %subscriber.id, "Failed to allocate an assistant: {}", e);
                    return Err(AppError::Authorization("No assistant assigned".to_string()));
                }
            },
        };

        let (task, charged) = self
            .store
            .create_task_charging(subscriber.id, assistant_id, &request)
            .await?;

        tracing::info!(
            task = %task.id,
            subscriber = %subscriber.id,
            assistant = %assistant_id,
            charged,
            "Task delegated"
        );

        let assistant = self.store.get_account(assistant_id).await?;
        Ok(TaskDetails {
            task,
            subscriber: AccountSummary::from(&subscriber),
            assistant: AccountSummary::from(&assistant),
        })
    }

    /// Apply a status update from the assigned assistant or an admin.
    /// Proof is recorded when supplied; on applied the subscriber's
    /// application record is upserted by link.
    pub async fn update_status(
        &self,
        actor: &Account,
        task_id: Uuid,
        status: TaskStatus,
        proof: Option<ProofUpload>,
        note: Option<String>,
    ) -> Result<DelegatedTask> {
        let mut task = self.store.get_task(task_id).await?;

        if actor.role != Role::Admin && task.assistant_id != actor.id {
            return Err(AppError::Authorization(
                "Task is assigned to another assistant".to_string(),
            ));
        }

        if let Some(proof) = proof {
            task.attach_proof(proof.filename, proof.path);
        }
        task.transition_to(status).map_err(AppError::Conflict)?;

        self.store
            .persist_transition(&task, actor.id, note.as_deref())
            .await?;

        tracing::info!(task = %task.id, status = status.as_str(), actor = %actor.id, "Task status updated");
        self.store.get_task(task_id).await
    }

    /// Tasks held by the assistant, newest first
    pub async fn list_assigned(&self, assistant_id: Uuid) -> Result<Vec<DelegatedTask>> {
        self.store.list_tasks_for_assistant(assistant_id).await
    }

    /// Administrator-driven reassignment
    pub async fn reassign(
        &self,
        subscriber_id: Uuid,
        assistant_id: Uuid,
    ) -> Result<(Account, Account)> {
        self.allocation.reassign(subscriber_id, assistant_id).await
    }

    /// Assistant workload and per-status aggregates
    pub async fn progress(&self, assistant_id: Uuid) -> Result<AssistantProgress> {
        self.allocation.progress(assistant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_manager() -> (DelegationManager, Store) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        let store = Store::new(pool);
        (DelegationManager::new(store.clone()), store)
    }

    async fn make_account(store: &Store, name: &str, role: Role, credits: i64) -> Account {
        store
            .create_account(
                name,
                &format!("{}@example.com", name),
                "$argon2id$stub",
                role,
                credits,
            )
            .await
            .unwrap()
    }

    fn delegate_request(link: &str) -> DelegateRequest {
        DelegateRequest {
            title: "Backend Engineer".to_string(),
            company: "Acme".to_string(),
            link: link.to_string(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_purchase_plan_sets_grant_and_window() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 3).await;
        make_account(&store, "helper", Role::Assistant, 0).await;

        let snapshot = manager.purchase_plan(alice.id, PlanTier::Pro).await.unwrap();

        assert_eq!(snapshot.credits, 800);
        assert!(snapshot.active);
        assert!(snapshot.expires_at.unwrap() > Utc::now());
        assert!(snapshot.assistant.is_some());
    }

    #[tokio::test]
    async fn test_purchase_plan_keeps_existing_assistant() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 0).await;
        let first = make_account(&store, "first", Role::Assistant, 0).await;
        store.auto_assign_assistant(alice.id).await.unwrap();
        make_account(&store, "second", Role::Assistant, 0).await;

        let snapshot = manager.purchase_plan(alice.id, PlanTier::Basic).await.unwrap();
        assert_eq!(snapshot.assistant, Some(first.id));
        assert_eq!(snapshot.credits, 500);
    }

    #[tokio::test]
    async fn test_delegate_assigns_assistant_on_first_delegation() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;
        let helper = make_account(&store, "helper", Role::Assistant, 0).await;

        let details = manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap();

        assert_eq!(details.assistant.id, helper.id);
        assert_eq!(details.task.assistant_id, helper.id);
        assert_eq!(details.task.status, TaskStatus::Pending);

        let reloaded = store.get_account(alice.id).await.unwrap();
        assert_eq!(reloaded.assigned_assistant, Some(helper.id));
        // one credit consumed: no active subscription
        assert_eq!(reloaded.credits, 999);
    }

    #[tokio::test]
    async fn test_delegate_without_any_assistant_or_admin() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;

        let err = manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Authorization(_)));
        assert!(format!("{}", err).contains("No assistant assigned"));
        assert!(store.list_tasks_for_subscriber(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delegate_refused_with_no_entitlement() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 0).await;
        make_account(&store, "helper", Role::Assistant, 0).await;

        let err = manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Authorization(_)));
        let reloaded = store.get_account(alice.id).await.unwrap();
        assert_eq!(reloaded.credits, 0);
        assert!(store.list_tasks_for_subscriber(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_status_applied_with_proof() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;
        let helper = make_account(&store, "helper", Role::Assistant, 0).await;

        let details = manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap();

        let updated = manager
            .update_status(
                &helper,
                details.task.id,
                TaskStatus::Applied,
                Some(ProofUpload {
                    filename: "proof.png".to_string(),
                    path: "uploads/proof.png".to_string(),
                }),
                Some("Submitted".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, TaskStatus::Applied);
        assert_eq!(updated.proof.as_ref().unwrap().filename, "proof.png");
        assert!(updated.completed_at.is_some());

        let records = store.list_application_records(alice.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].link, "https://a.example/1");
    }

    #[tokio::test]
    async fn test_update_status_applied_without_proof_is_accepted() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;
        let helper = make_account(&store, "helper", Role::Assistant, 0).await;

        let details = manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap();

        let updated = manager
            .update_status(&helper, details.task.id, TaskStatus::Applied, None, None)
            .await
            .unwrap();

        assert_eq!(updated.status, TaskStatus::Applied);
        assert!(updated.proof.is_none());
    }

    #[tokio::test]
    async fn test_update_status_by_other_assistant_is_refused() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;
        make_account(&store, "helper", Role::Assistant, 0).await;
        let details = manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap();

        let outsider = make_account(&store, "outsider", Role::Assistant, 0).await;
        let err = manager
            .update_status(&outsider, details.task.id, TaskStatus::Applied, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_update_status_by_admin_is_allowed() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;
        make_account(&store, "helper", Role::Assistant, 0).await;
        let admin = make_account(&store, "root", Role::Admin, 0).await;

        let details = manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap();

        let updated = manager
            .update_status(&admin, details.task.id, TaskStatus::Rejected, None, None)
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Rejected);
    }

    #[tokio::test]
    async fn test_update_status_terminal_task_conflicts() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;
        let helper = make_account(&store, "helper", Role::Assistant, 0).await;

        let details = manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap();
        manager
            .update_status(&helper, details.task.id, TaskStatus::Applied, None, None)
            .await
            .unwrap();

        let err = manager
            .update_status(&helper, details.task.id, TaskStatus::Rejected, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let reloaded = store.get_task(details.task.id).await.unwrap();
        assert_eq!(reloaded.status, TaskStatus::Applied);
    }

    #[tokio::test]
    async fn test_update_status_unknown_task() {
        let (manager, store) = setup_manager().await;
        let helper = make_account(&store, "helper", Role::Assistant, 0).await;

        let err = manager
            .update_status(&helper, Uuid::new_v4(), TaskStatus::Applied, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_assigned_newest_first() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;
        let helper = make_account(&store, "helper", Role::Assistant, 0).await;

        manager
            .delegate(&alice, delegate_request("https://a.example/1"))
            .await
            .unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        let second = manager
            .delegate(&alice, delegate_request("https://a.example/2"))
            .await
            .unwrap();

        let tasks = manager.list_assigned(helper.id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, second.task.id);
    }

    #[tokio::test]
    async fn test_reassign_moves_history_and_progress_reports_it() {
        let (manager, store) = setup_manager().await;
        let alice = make_account(&store, "alice", Role::Subscriber, 1000).await;
        let first = make_account(&store, "first", Role::Assistant, 0).await;

        for i in 0..3 {
            manager
                .delegate(&alice, delegate_request(&format!("https://a.example/{}", i)))
                .await
                .unwrap();
        }

        let second = make_account(&store, "second", Role::Assistant, 0).await;
        manager.reassign(alice.id, second.id).await.unwrap();

        let progress = manager.progress(second.id).await.unwrap();
        assert_eq!(progress.tasks.len(), 3);
        let pending = progress
            .stats
            .iter()
            .find(|s| s.status == TaskStatus::Pending)
            .unwrap();
        assert_eq!(pending.count, 3);

        assert!(manager.progress(first.id).await.unwrap().tasks.is_empty());
    }
}
