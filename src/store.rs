//! Database store for accounts, delegated tasks, and application records

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::delegation::allocation::StatusStat;
use crate::delegation::task::{DelegatedTask, ProofDocument, TaskHistoryEntry, TaskStatus};
use crate::error::{AppError, Result};
use crate::models::{Account, Activity, ApplicationRecord, DelegateRequest, Role};

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // Account operations

    pub async fn create_account(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: Role,
        credits: i64,
    ) -> Result<Account> {
        if self.find_account_by_name(name).await?.is_some() {
            return Err(AppError::Conflict(
                "Username is already taken. Please choose a different one.".to_string(),
            ));
        }
        if self.find_account_by_email(email).await?.is_some() {
            return Err(AppError::Conflict("Email is already registered.".to_string()));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO accounts (id, name, email, password_hash, role, credits, plan, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'basic', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(credits)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_account(id).await
    }

    pub async fn get_account(&self, id: Uuid) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, email, password_hash, role, credits, plan,
                   subscription_start, subscription_end, assigned_assistant,
                   created_at, updated_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account {} not found", id)))?;

        row.try_into()
    }

    pub async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, email, password_hash, role, credits, plan,
                   subscription_start, subscription_end, assigned_assistant,
                   created_at, updated_at
            FROM accounts
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    pub async fn find_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, email, password_hash, role, credits, plan,
                   subscription_start, subscription_end, assigned_assistant,
                   created_at, updated_at
            FROM accounts
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    pub async fn list_accounts_by_role(&self, role: Role) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, email, password_hash, role, credits, plan,
                   subscription_start, subscription_end, assigned_assistant,
                   created_at, updated_at
            FROM accounts
            WHERE role = ?
            ORDER BY id ASC
            "#,
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Subscribers currently managed by an assistant, derived from the
    /// forward assignment edge
    pub async fn managed_subscribers(&self, assistant_id: Uuid) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, email, password_hash, role, credits, plan,
                   subscription_start, subscription_end, assigned_assistant,
                   created_at, updated_at
            FROM accounts
            WHERE assigned_assistant = ?
            ORDER BY id ASC
            "#,
        )
        .bind(assistant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE accounts SET password_hash = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(password_hash)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Account {} not found", id)));
        }
        Ok(())
    }

    /// Replace an account's entitlement: plan, credit balance, and
    /// subscription window are written together or not at all.
    pub async fn set_entitlement(
        &self,
        id: Uuid,
        plan: crate::models::PlanTier,
        credits: i64,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
    ) -> Result<Account> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET plan = ?, credits = ?, subscription_start = ?, subscription_end = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(plan.as_str())
        .bind(credits)
        .bind(start)
        .bind(end)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Account {} not found", id)));
        }

        self.get_account(id).await
    }

    // Allocation operations

    /// Pick the assistant with the fewest pending tasks (ties broken by
    /// account id) and assign it to the subscriber. Falls back to an admin
    /// account when no assistant exists. The scan and the assignment write
    /// share one transaction so concurrent assignments cannot act on the
    /// same stale count.
    pub async fn auto_assign_assistant(&self, subscriber_id: Uuid) -> Result<Account> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let picked: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT a.id
            FROM accounts a
            LEFT JOIN delegated_tasks t ON t.assistant_id = a.id AND t.status = 'pending'
            WHERE a.role = 'assistant'
            GROUP BY a.id
            ORDER BY COUNT(t.id) ASC, a.id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let assistant_id = match picked {
            Some((id,)) => id,
            None => {
                let admin: Option<(String,)> = sqlx::query_as(
                    r#"
                    SELECT id FROM accounts WHERE role = 'admin' ORDER BY id ASC LIMIT 1
                    "#,
                )
                .fetch_optional(&mut *tx)
                .await?;

                admin
                    .ok_or_else(|| {
                        AppError::Internal("No assistant or admin account configured".to_string())
                    })?
                    .0
            }
        };

        let result = sqlx::query(
            r#"
            UPDATE accounts SET assigned_assistant = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(&assistant_id)
        .bind(now)
        .bind(subscriber_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Account {} not found", subscriber_id)));
        }

        tx.commit().await?;

        let assistant_id = Uuid::parse_str(&assistant_id)
            .map_err(|e| AppError::Internal(format!("Invalid UUID: {}", e)))?;
        self.get_account(assistant_id).await
    }

    /// Atomically move the subscriber and every one of their delegated
    /// tasks to a new assistant. Returns the number of tasks migrated.
    pub async fn reassign_subscriber(
        &self,
        subscriber_id: Uuid,
        assistant_id: Uuid,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            UPDATE delegated_tasks SET assistant_id = ?, updated_at = ? WHERE subscriber_id = ?
            "#,
        )
        .bind(assistant_id.to_string())
        .bind(now)
        .bind(subscriber_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let result = sqlx::query(
            r#"
            UPDATE accounts SET assigned_assistant = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(assistant_id.to_string())
        .bind(now)
        .bind(subscriber_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Account {} not found", subscriber_id)));
        }

        tx.commit().await?;
        Ok(moved)
    }

    // Delegated task operations

    /// Create a delegated task, charging one credit when the subscriber's
    /// subscription is inactive. The re-read, the guarded decrement, and
    /// the task insert commit as one unit; a failed charge aborts with no
    /// task row and an unchanged balance.
    pub async fn create_task_charging(
        &self,
        subscriber_id: Uuid,
        assistant_id: Uuid,
        request: &DelegateRequest,
    ) -> Result<(DelegatedTask, bool)> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, name, email, password_hash, role, credits, plan,
                   subscription_start, subscription_end, assigned_assistant,
                   created_at, updated_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(subscriber_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account {} not found", subscriber_id)))?;

        let subscriber: Account = row.try_into()?;

        let charged = if crate::delegation::ledger::should_charge(&subscriber, now) {
            let result = sqlx::query(
                r#"
                UPDATE accounts SET credits = credits - 1, updated_at = ? WHERE id = ? AND credits > 0
                "#,
            )
            .bind(now)
            .bind(subscriber_id.to_string())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::Authorization(
                    "Active subscription or remaining credits required".to_string(),
                ));
            }
            true
        } else {
            false
        };

        let task = DelegatedTask::new(
            &request.title,
            &request.company,
            &request.link,
            &request.description,
            subscriber_id,
            assistant_id,
        );

        sqlx::query(
            r#"
            INSERT INTO delegated_tasks
                (id, title, company, link, description, subscriber_id, assistant_id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.title)
        .bind(&task.company)
        .bind(&task.link)
        .bind(&task.description)
        .bind(task.subscriber_id.to_string())
        .bind(task.assistant_id.to_string())
        .bind(task.status.as_str())
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO task_history (id, task_id, status, actor_id, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(task.id.to_string())
        .bind(task.status.as_str())
        .bind(subscriber_id.to_string())
        .bind("Task delegated")
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((task, charged))
    }

    pub async fn get_task(&self, id: Uuid) -> Result<DelegatedTask> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, company, link, description, subscriber_id, assistant_id,
                   status, proof_filename, proof_path, proof_uploaded_at,
                   completed_at, created_at, updated_at
            FROM delegated_tasks
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))?;

        row.try_into()
    }

    pub async fn list_tasks_for_assistant(&self, assistant_id: Uuid) -> Result<Vec<DelegatedTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, company, link, description, subscriber_id, assistant_id,
                   status, proof_filename, proof_path, proof_uploaded_at,
                   completed_at, created_at, updated_at
            FROM delegated_tasks
            WHERE assistant_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(assistant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn list_tasks_for_subscriber(
        &self,
        subscriber_id: Uuid,
    ) -> Result<Vec<DelegatedTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, title, company, link, description, subscriber_id, assistant_id,
                   status, proof_filename, proof_path, proof_uploaded_at,
                   completed_at, created_at, updated_at
            FROM delegated_tasks
            WHERE subscriber_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(subscriber_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn count_pending_tasks(&self, assistant_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM delegated_tasks WHERE assistant_id = ? AND status = 'pending'
            "#,
        )
        .bind(assistant_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Persist an already-validated status transition: the task row, its
    /// history entry, and (on applied) the subscriber's mirror record are
    /// written in one transaction.
    pub async fn persist_transition(
        &self,
        task: &DelegatedTask,
        actor_id: Uuid,
        note: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE delegated_tasks
            SET status = ?, proof_filename = ?, proof_path = ?, proof_uploaded_at = ?,
                completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.proof.as_ref().map(|p| p.filename.clone()))
        .bind(task.proof.as_ref().map(|p| p.path.clone()))
        .bind(task.proof.as_ref().map(|p| p.uploaded_at))
        .bind(task.completed_at)
        .bind(task.updated_at)
        .bind(task.id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Task {} not found", task.id)));
        }

        sqlx::query(
            r#"
            INSERT INTO task_history (id, task_id, status, actor_id, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(task.id.to_string())
        .bind(task.status.as_str())
        .bind(actor_id.to_string())
        .bind(note)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if task.status == TaskStatus::Applied {
            sqlx::query(
                r#"
                INSERT INTO application_records (id, account_id, title, company, status, link, applied_at)
                VALUES (?, ?, ?, ?, 'applied', ?, ?)
                ON CONFLICT(account_id, link) DO UPDATE SET
                    status = excluded.status,
                    title = excluded.title,
                    company = excluded.company,
                    applied_at = excluded.applied_at
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(task.subscriber_id.to_string())
            .bind(&task.title)
            .bind(&task.company)
            .bind(&task.link)
            .bind(task.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn task_history(&self, task_id: Uuid) -> Result<Vec<TaskHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, task_id, status, actor_id, note, created_at
            FROM task_history
            WHERE task_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Per-status counts for an assistant, with mean seconds to completion
    /// averaged only over tasks that have left pending
    pub async fn assistant_status_stats(&self, assistant_id: Uuid) -> Result<Vec<StatusStat>> {
        let rows = sqlx::query_as::<_, StatRow>(
            r#"
            SELECT status,
                   COUNT(*) AS count,
                   AVG(CASE WHEN completed_at IS NOT NULL
                       THEN (julianday(completed_at) - julianday(created_at)) * 86400.0
                       END) AS avg_completion_secs
            FROM delegated_tasks
            WHERE assistant_id = ?
            GROUP BY status
            ORDER BY status ASC
            "#,
        )
        .bind(assistant_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Application record operations

    pub async fn list_application_records(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<ApplicationRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, account_id, title, company, status, link, applied_at, notes
            FROM application_records
            WHERE account_id = ?
            ORDER BY applied_at DESC
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Activity operations

    pub async fn record_activity(
        &self,
        account_id: Uuid,
        kind: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Activity> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO activities (id, account_id, kind, data, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(account_id.to_string())
        .bind(kind)
        .bind(data.as_ref().map(|d| d.to_string()))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Activity {
            id,
            account_id,
            kind: kind.to_string(),
            data,
            created_at: now,
        })
    }
}

// Internal row types for sqlx

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Internal(format!("Invalid UUID: {}", e)))
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    credits: i64,
    plan: String,
    subscription_start: Option<chrono::DateTime<Utc>>,
    subscription_end: Option<chrono::DateTime<Utc>>,
    assigned_assistant: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = AppError;

    fn try_from(row: AccountRow) -> Result<Self> {
        let assigned_assistant = row
            .assigned_assistant
            .as_deref()
            .map(parse_uuid)
            .transpose()?;

        Ok(Account {
            id: parse_uuid(&row.id)?,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: row
                .role
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid role: {}", e)))?,
            credits: row.credits,
            plan: row
                .plan
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid plan: {}", e)))?,
            subscription_start: row.subscription_start,
            subscription_end: row.subscription_end,
            assigned_assistant,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    title: String,
    company: String,
    link: String,
    description: String,
    subscriber_id: String,
    assistant_id: String,
    status: String,
    proof_filename: Option<String>,
    proof_path: Option<String>,
    proof_uploaded_at: Option<chrono::DateTime<Utc>>,
    completed_at: Option<chrono::DateTime<Utc>>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<TaskRow> for DelegatedTask {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let proof = match (row.proof_filename, row.proof_path, row.proof_uploaded_at) {
            (Some(filename), Some(path), Some(uploaded_at)) => Some(ProofDocument {
                filename,
                path,
                uploaded_at,
            }),
            _ => None,
        };

        Ok(DelegatedTask {
            id: parse_uuid(&row.id)?,
            title: row.title,
            company: row.company,
            link: row.link,
            description: row.description,
            subscriber_id: parse_uuid(&row.subscriber_id)?,
            assistant_id: parse_uuid(&row.assistant_id)?,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            proof,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: String,
    task_id: String,
    status: String,
    actor_id: String,
    note: Option<String>,
    created_at: chrono::DateTime<Utc>,
}

impl TryFrom<HistoryRow> for TaskHistoryEntry {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(TaskHistoryEntry {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            actor_id: parse_uuid(&row.actor_id)?,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    account_id: String,
    title: String,
    company: String,
    status: String,
    link: String,
    applied_at: Option<chrono::DateTime<Utc>>,
    notes: Option<String>,
}

impl TryFrom<RecordRow> for ApplicationRecord {
    type Error = AppError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(ApplicationRecord {
            id: parse_uuid(&row.id)?,
            account_id: parse_uuid(&row.account_id)?,
            title: row.title,
            company: row.company,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            link: row.link,
            applied_at: row.applied_at,
            notes: row.notes,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatRow {
    status: String,
    count: i64,
    avg_completion_secs: Option<f64>,
}

impl TryFrom<StatRow> for StatusStat {
    type Error = AppError;

    fn try_from(row: StatRow) -> Result<Self> {
        Ok(StatusStat {
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            count: row.count,
            avg_completion_secs: row.avg_completion_secs,
        })
    }
}
