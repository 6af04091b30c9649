use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::approval::{
    select_level, ApprovalAssignment, ApprovalGate, ApprovalLevel, ApprovalWorkflowState,
};
use crate::config::DatabaseConfig;
use crate::store::{
    FieldSet, IntentStatus, LoanApplicationRecord, LoanFieldUpdate, RecallRecord, RecordStore,
    StoreError, SubmissionIntent, WorkflowStepRecord,
};
use crate::workflow::WorkflowStage;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable {
                    store: "database",
                    reason: err.to_string(),
                }
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// SQLite-backed record store and approval gate
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Initialize database with automatic migrations
    pub async fn new(database_url: &str, max_connections: u32, auto_migrate: bool) -> Result<Self> {
        // Create database if it doesn't exist
        if !sqlx::Sqlite::database_exists(database_url).await? {
            info!("Creating database at {}", database_url);
            sqlx::Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        if auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(&config.url).parent() {
            if !parent.as_os_str().is_empty() && !config.url.contains("://") {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::new(&config.url, config.max_connections, config.auto_migrate).await
    }

    /// Record the approval subsystem's decision for a loan
    pub async fn set_approval_status(&self, loan_id: &str, approval_status: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO approval_workflow_states (loan_application_id, approval_status, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(loan_application_id)
            DO UPDATE SET approval_status = excluded.approval_status, updated_at = excluded.updated_at
            "#,
        )
        .bind(loan_id)
        .bind(approval_status)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_stage(raw: &str) -> Result<WorkflowStage, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Serialization(format!("{e}")))
}

fn loan_from_row(row: &SqliteRow) -> Result<LoanApplicationRecord, StoreError> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let status_changed_at: Option<String> = row.try_get("status_changed_at")?;
    Ok(LoanApplicationRecord {
        id: row.try_get("id")?,
        application_number: row.try_get("application_number")?,
        client_id: row.try_get("client_id")?,
        client_type: row.try_get("client_type")?,
        amount: row.try_get("amount")?,
        status: row.try_get("status")?,
        contract_status: row.try_get("contract_status")?,
        replaces_id: row.try_get("replaces_id")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
        status_changed_at: status_changed_at.as_deref().map(parse_time).transpose()?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<WorkflowStepRecord, StoreError> {
    let completed_at: String = row.try_get("completed_at")?;
    Ok(WorkflowStepRecord {
        id: row.try_get("id")?,
        loan_application_id: row.try_get("loan_application_id")?,
        step_name: row.try_get("step_name")?,
        status: row.try_get("status")?,
        user_id: row.try_get("user_id")?,
        notes: row.try_get("notes")?,
        completed_at: parse_time(&completed_at)?,
    })
}

fn intent_from_row(row: &SqliteRow) -> Result<SubmissionIntent, StoreError> {
    let current: String = row.try_get("current_stage")?;
    let target: String = row.try_get("target_stage")?;
    let status: String = row.try_get("status")?;
    let submitted_at: String = row.try_get("submitted_at")?;
    Ok(SubmissionIntent {
        id: row.try_get("id")?,
        loan_application_id: row.try_get("loan_application_id")?,
        current_stage: parse_stage(&current)?,
        target_stage: parse_stage(&target)?,
        submitted_by: row.try_get("submitted_by")?,
        status: if status == IntentStatus::Completed.as_str() {
            IntentStatus::Completed
        } else {
            IntentStatus::Pending
        },
        notes: row.try_get("notes")?,
        submitted_at: parse_time(&submitted_at)?,
    })
}

fn recall_from_row(row: &SqliteRow) -> Result<RecallRecord, StoreError> {
    let from: String = row.try_get("recalled_from_stage")?;
    let to: String = row.try_get("recalled_to_stage")?;
    let recalled_at: String = row.try_get("recalled_at")?;
    Ok(RecallRecord {
        id: row.try_get("id")?,
        loan_application_id: row.try_get("loan_application_id")?,
        recalled_from_stage: parse_stage(&from)?,
        recalled_to_stage: parse_stage(&to)?,
        recalled_by: row.try_get("recalled_by")?,
        reason: row.try_get("reason")?,
        recalled_at: parse_time(&recalled_at)?,
    })
}

fn level_from_row(row: &SqliteRow) -> Result<ApprovalLevel, StoreError> {
    let rank: i64 = row.try_get("rank")?;
    let client_types: String = row.try_get("client_types")?;
    Ok(ApprovalLevel {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        rank: rank as u32,
        min_amount: row.try_get("min_amount")?,
        max_amount: row.try_get("max_amount")?,
        client_types: serde_json::from_str(&client_types)?,
    })
}

#[async_trait]
impl RecordStore for DatabaseManager {
    async fn fetch_loan(&self, id: &str) -> Result<Option<LoanApplicationRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM loan_applications WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(loan_from_row).transpose()
    }

    async fn update_loan(&self, id: &str, update: &LoanFieldUpdate) -> Result<(), StoreError> {
        let sql = match update.field_set() {
            FieldSet::StatusOnly => "UPDATE loan_applications SET status = ?1 WHERE id = ?4",
            FieldSet::StatusWithUpdatedAt => {
                "UPDATE loan_applications SET status = ?1, updated_at = ?2 WHERE id = ?4"
            }
            FieldSet::StatusWithTimestamps => {
                "UPDATE loan_applications SET status = ?1, updated_at = ?2, status_changed_at = ?3 WHERE id = ?4"
            }
        };
        let result = sqlx::query(sql)
            .bind(&update.status)
            .bind(update.updated_at.map(timestamp))
            .bind(update.status_changed_at.map(timestamp))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        debug!(loan_id = %id, field_set = ?update.field_set(), "Loan status updated");
        Ok(())
    }

    async fn insert_loan(&self, record: &LoanApplicationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO loan_applications (
                id, application_number, client_id, client_type, amount, status,
                contract_status, replaces_id, created_by, updated_by,
                created_at, updated_at, status_changed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&record.id)
        .bind(&record.application_number)
        .bind(&record.client_id)
        .bind(&record.client_type)
        .bind(record.amount)
        .bind(&record.status)
        .bind(&record.contract_status)
        .bind(&record.replaces_id)
        .bind(&record.created_by)
        .bind(&record.updated_by)
        .bind(timestamp(record.created_at))
        .bind(timestamp(record.updated_at))
        .bind(record.status_changed_at.map(timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_audit_step(&self, step: &WorkflowStepRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_steps (id, loan_application_id, step_name, status, user_id, notes, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&step.id)
        .bind(&step.loan_application_id)
        .bind(&step.step_name)
        .bind(&step.status)
        .bind(&step.user_id)
        .bind(&step.notes)
        .bind(timestamp(step.completed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_audit_steps(&self, loan_id: &str) -> Result<Vec<WorkflowStepRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_steps
            WHERE loan_application_id = ?1
            ORDER BY completed_at DESC, rowid DESC
            "#,
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(step_from_row).collect()
    }

    async fn insert_submission_intent(&self, intent: &SubmissionIntent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO submission_intents (
                id, loan_application_id, current_stage, target_stage,
                submitted_by, status, notes, submitted_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&intent.id)
        .bind(&intent.loan_application_id)
        .bind(intent.current_stage.as_str())
        .bind(intent.target_stage.as_str())
        .bind(&intent.submitted_by)
        .bind(intent.status.as_str())
        .bind(&intent.notes)
        .bind(timestamp(intent.submitted_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_pending_intent(
        &self,
        loan_id: &str,
        target: WorkflowStage,
    ) -> Result<Option<SubmissionIntent>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM submission_intents
            WHERE loan_application_id = ?1 AND target_stage = ?2 AND status = ?3
            ORDER BY submitted_at DESC
            LIMIT 1
            "#,
        )
        .bind(loan_id)
        .bind(target.as_str())
        .bind(IntentStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(intent_from_row).transpose()
    }

    async fn complete_submission_intent(&self, intent_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE submission_intents SET status = ?1 WHERE id = ?2")
            .bind(IntentStatus::Completed.as_str())
            .bind(intent_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                id: intent_id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_recall_record(&self, record: &RecallRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO recall_records (
                id, loan_application_id, recalled_from_stage, recalled_to_stage,
                recalled_by, reason, recalled_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record.id)
        .bind(&record.loan_application_id)
        .bind(record.recalled_from_stage.as_str())
        .bind(record.recalled_to_stage.as_str())
        .bind(&record.recalled_by)
        .bind(&record.reason)
        .bind(timestamp(record.recalled_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_recall_record(&self, loan_id: &str) -> Result<Option<RecallRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM recall_records
            WHERE loan_application_id = ?1
            ORDER BY recalled_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(loan_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(recall_from_row).transpose()
    }
}

#[async_trait]
impl ApprovalGate for DatabaseManager {
    async fn determine_approval_level(
        &self,
        amount: f64,
        client_type: &str,
    ) -> Result<Option<ApprovalLevel>, StoreError> {
        let rows = sqlx::query("SELECT * FROM approval_levels ORDER BY rank ASC")
            .fetch_all(&self.pool)
            .await?;
        let levels = rows
            .iter()
            .map(level_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(select_level(&levels, amount, client_type).cloned())
    }

    async fn create_approval_assignment(
        &self,
        loan_id: &str,
        level_id: &str,
        assigned_user_id: Option<String>,
        initiated_by: &str,
    ) -> Result<ApprovalAssignment, StoreError> {
        let level_exists = sqlx::query("SELECT id FROM approval_levels WHERE id = ?1")
            .bind(level_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !level_exists {
            return Err(StoreError::NotFound {
                id: level_id.to_string(),
            });
        }

        let assignment = ApprovalAssignment {
            id: Uuid::new_v4().to_string(),
            loan_application_id: loan_id.to_string(),
            level_id: level_id.to_string(),
            assigned_user_id,
            initiated_by: initiated_by.to_string(),
            status: "pending".to_string(),
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO approval_assignments (
                id, loan_application_id, level_id, assigned_user_id, initiated_by, status, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&assignment.id)
        .bind(&assignment.loan_application_id)
        .bind(&assignment.level_id)
        .bind(&assignment.assigned_user_id)
        .bind(&assignment.initiated_by)
        .bind(&assignment.status)
        .bind(timestamp(assignment.created_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO approval_workflow_states (
                loan_application_id, approval_status, current_level_id, assigned_user_id, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(loan_application_id) DO UPDATE SET
                approval_status = excluded.approval_status,
                current_level_id = excluded.current_level_id,
                assigned_user_id = excluded.assigned_user_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(loan_id)
        .bind(&assignment.status)
        .bind(level_id)
        .bind(&assignment.assigned_user_id)
        .bind(timestamp(assignment.created_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(loan_id = %loan_id, level_id = %level_id, "Approval assignment created");
        Ok(assignment)
    }

    async fn get_approval_workflow_state(
        &self,
        loan_id: &str,
    ) -> Result<Option<ApprovalWorkflowState>, StoreError> {
        let row = sqlx::query("SELECT * FROM approval_workflow_states WHERE loan_application_id = ?1")
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let updated_at: String = row.try_get("updated_at")?;
        Ok(Some(ApprovalWorkflowState {
            loan_application_id: row.try_get("loan_application_id")?,
            approval_status: row.try_get("approval_status")?,
            current_level_id: row.try_get("current_level_id")?,
            assigned_user_id: row.try_get("assigned_user_id")?,
            updated_at: parse_time(&updated_at)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn manager() -> (DatabaseManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("workflow.db").display());
        let manager = DatabaseManager::new(&url, 2, true).await.unwrap();
        (manager, dir)
    }

    #[tokio::test]
    async fn test_loan_round_trip_and_partial_update() {
        let (db, _dir) = manager().await;
        let record = LoanApplicationRecord::submitted("loan-1", "LA-20240101-000001")
            .with_amount(12_000.0, "individual");
        db.insert_loan(&record).await.unwrap();

        let update = FieldSet::StatusWithTimestamps.build("under_review", Utc::now());
        db.update_loan("loan-1", &update).await.unwrap();

        let fetched = db.fetch_loan("loan-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, "under_review");
        assert_eq!(fetched.amount, Some(12_000.0));
        assert!(fetched.status_changed_at.is_some());

        let missing = db.update_loan("nope", &update).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_intent_lifecycle() {
        let (db, _dir) = manager().await;
        let intent = SubmissionIntent::pending(
            "loan-1",
            WorkflowStage::Submitted,
            WorkflowStage::Assessment,
            "officer-1",
            None,
        );
        db.insert_submission_intent(&intent).await.unwrap();

        let pending = db
            .find_pending_intent("loan-1", WorkflowStage::Assessment)
            .await
            .unwrap();
        assert_eq!(pending.map(|i| i.id), Some(intent.id.clone()));

        db.complete_submission_intent(&intent.id).await.unwrap();
        assert!(db
            .find_pending_intent("loan-1", WorkflowStage::Assessment)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_seeded_approval_levels() {
        let (db, _dir) = manager().await;
        let level = db
            .determine_approval_level(120_000.0, "business")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.id, "branch_manager");

        db.create_approval_assignment("loan-1", &level.id, None, "officer-1")
            .await
            .unwrap();
        let state = db.get_approval_workflow_state("loan-1").await.unwrap().unwrap();
        assert_eq!(state.approval_status, "pending");

        db.set_approval_status("loan-1", "approved").await.unwrap();
        let state = db.get_approval_workflow_state("loan-1").await.unwrap().unwrap();
        assert!(state.is_approved());
        assert_eq!(state.current_level_id.as_deref(), Some("branch_manager"));
    }

    #[tokio::test]
    async fn test_unknown_level_assignment_fails() {
        let (db, _dir) = manager().await;
        let result = db
            .create_approval_assignment("loan-1", "board", None, "officer-1")
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }
}
