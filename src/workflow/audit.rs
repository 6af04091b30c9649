//! Append-only workflow step log.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{AdvisoryFailure, AdvisoryStep, WorkflowError};
use crate::store::{RecordStore, WorkflowStepRecord};

/// Best-effort writer for workflow steps.
///
/// A failed append is logged and handed back as an `AdvisoryFailure`; it never
/// fails the operation that produced the step.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn RecordStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn record_step(
        &self,
        loan_id: &str,
        step_name: &str,
        user_id: &str,
        notes: Option<&str>,
    ) -> Option<AdvisoryFailure> {
        let step = WorkflowStepRecord {
            id: Uuid::new_v4().to_string(),
            loan_application_id: loan_id.to_string(),
            step_name: step_name.to_string(),
            status: "completed".to_string(),
            user_id: user_id.to_string(),
            notes: notes.map(str::to_string),
            completed_at: Utc::now(),
        };

        match self.store.insert_audit_step(&step).await {
            Ok(()) => {
                debug!(loan_id = %loan_id, step = %step_name, "Workflow step recorded");
                None
            }
            Err(e) => {
                warn!(
                    loan_id = %loan_id,
                    step = %step_name,
                    error = %e,
                    "Failed to record workflow step"
                );
                Some(AdvisoryFailure::new(AdvisoryStep::AuditAppend, &e))
            }
        }
    }
}

#[derive(Clone)]
pub struct WorkflowHistoryReader {
    store: Arc<dyn RecordStore>,
}

impl WorkflowHistoryReader {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Recorded steps, most recent first, optionally truncated to `limit`
    pub async fn history(
        &self,
        loan_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<WorkflowStepRecord>, WorkflowError> {
        let mut steps = self.store.query_audit_steps(loan_id).await?;
        steps.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        if let Some(limit) = limit {
            steps.truncate(limit);
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;

    #[tokio::test]
    async fn test_failed_append_is_swallowed() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_audit_unavailable(true);

        let failure = AuditRecorder::new(store)
            .record_step("loan-1", "recalled", "officer-1", Some("missing documents"))
            .await
            .expect("failure reported");
        assert_eq!(failure.step, AdvisoryStep::AuditAppend);
    }

    #[tokio::test]
    async fn test_history_limit() {
        let store = Arc::new(InMemoryRecordStore::new());
        let recorder = AuditRecorder::new(store.clone());
        for step in ["submitted_to_assessment", "submitted_to_contract_generation", "recalled"] {
            assert!(recorder.record_step("loan-1", step, "officer-1", None).await.is_none());
        }

        let history = WorkflowHistoryReader::new(store)
            .history("loan-1", Some(2))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].step_name, "recalled");
    }
}
