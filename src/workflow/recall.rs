//! Operator-initiated rollback and the explicit resubmission that follows it.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::audit::AuditRecorder;
use super::errors::{Rejection, WorkflowError};
use super::resolver::WorkflowStateResolver;
use super::types::{status, TransitionOutcome, WorkflowStage};
use super::writer::ResilientStatusWriter;
use crate::store::{FieldSet, RecallRecord, RecordStore};

#[derive(Clone)]
pub struct RecallCoordinator {
    store: Arc<dyn RecordStore>,
    resolver: WorkflowStateResolver,
    writer: ResilientStatusWriter,
    audit: AuditRecorder,
}

impl RecallCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, writer: ResilientStatusWriter) -> Self {
        Self {
            resolver: WorkflowStateResolver::new(store.clone()),
            audit: AuditRecorder::new(store.clone()),
            store,
            writer,
        }
    }

    /// Roll a loan back to `target` (default: the stage before the current one).
    ///
    /// The status write is a single direct update and does not go through the
    /// resilience cascade.
    pub async fn recall_loan(
        &self,
        loan_id: &str,
        user_id: &str,
        reason: &str,
        target: Option<WorkflowStage>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let Some(loan) = self.resolver.load(loan_id).await? else {
            return Ok(self.rejected(Rejection::NotFound {
                loan_id: loan_id.to_string(),
            }));
        };
        let current = loan.state.current_stage;

        if !loan.state.can_be_recalled {
            return Ok(self.rejected(Rejection::NotRecallable {
                stage: current,
                status: loan.record.status,
            }));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Ok(self.rejected(Rejection::MissingReason));
        }

        let recalled_to = match target.or_else(|| current.predecessor()) {
            Some(stage) if stage < current => stage,
            Some(stage) => {
                return Ok(self.rejected(Rejection::InvalidRecallTarget {
                    current,
                    target: stage,
                }))
            }
            None => {
                return Ok(self.rejected(Rejection::NotRecallable {
                    stage: current,
                    status: loan.record.status,
                }))
            }
        };

        let record = RecallRecord {
            id: Uuid::new_v4().to_string(),
            loan_application_id: loan_id.to_string(),
            recalled_from_stage: current,
            recalled_to_stage: recalled_to,
            recalled_by: user_id.to_string(),
            reason: reason.to_string(),
            recalled_at: Utc::now(),
        };
        self.store.insert_recall_record(&record).await?;

        let update = FieldSet::StatusOnly.build(status::RECALLED, Utc::now());
        self.store.update_loan(loan_id, &update).await?;

        let advisory_failures = self
            .audit
            .record_step(loan_id, "recalled", user_id, Some(reason))
            .await
            .into_iter()
            .collect();

        info!(
            loan_id = %loan_id,
            user_id = %user_id,
            from = %current,
            to = %recalled_to,
            "Loan application recalled"
        );

        Ok(TransitionOutcome {
            success: true,
            message: format!(
                "Loan application recalled from {} to {}",
                current, recalled_to
            ),
            rejection: None,
            persisted_status: Some(status::RECALLED.to_string()),
            strategy: None,
            new_loan_id: None,
            advisory_failures,
        })
    }

    /// Return a recalled loan to the stage recorded on its latest recall.
    ///
    /// Forward submissions are refused while a loan is recalled; this is the
    /// explicit operator step that clears the flag.
    pub async fn resubmit_recalled_loan(
        &self,
        loan_id: &str,
        user_id: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let Some(record) = self.store.fetch_loan(loan_id).await? else {
            return Ok(self.rejected(Rejection::NotFound {
                loan_id: loan_id.to_string(),
            }));
        };
        if record.status != status::RECALLED {
            return Ok(self.rejected(Rejection::NotRecalled {
                status: record.status,
            }));
        }

        let stage = self
            .store
            .latest_recall_record(loan_id)
            .await?
            .map(|recall| recall.recalled_to_stage)
            .unwrap_or(WorkflowStage::Submitted);

        let outcome = self
            .restore_stage(loan_id, stage, &format!("resubmitted_to_{}", stage), user_id, notes)
            .await?;
        info!(loan_id = %loan_id, stage = %stage, "Recalled loan application resubmitted");
        Ok(outcome)
    }

    /// Put a rejected loan back into assessment.
    ///
    /// Rejected loans refuse forward submission and recall until reopened.
    pub async fn reopen_rejected_loan(
        &self,
        loan_id: &str,
        user_id: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let Some(record) = self.store.fetch_loan(loan_id).await? else {
            return Ok(self.rejected(Rejection::NotFound {
                loan_id: loan_id.to_string(),
            }));
        };
        if record.status != status::REJECTED {
            return Ok(self.rejected(Rejection::NotRejected {
                status: record.status,
            }));
        }

        let stage = WorkflowStage::Assessment;
        let outcome = self
            .restore_stage(loan_id, stage, &format!("reopened_to_{}", stage), user_id, notes)
            .await?;
        info!(loan_id = %loan_id, "Rejected loan application reopened");
        Ok(outcome)
    }

    /// Write the resting status of `stage` through the cascade and audit it
    async fn restore_stage(
        &self,
        loan_id: &str,
        stage: WorkflowStage,
        step_name: &str,
        user_id: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let new_status = stage.resting_status();
        let write = self
            .writer
            .update_loan_status(loan_id, new_status, Some(user_id))
            .await?;

        let effective_id = write.new_loan_id.as_deref().unwrap_or(loan_id);
        let advisory_failures = self
            .audit
            .record_step(effective_id, step_name, user_id, notes)
            .await
            .into_iter()
            .collect();

        Ok(TransitionOutcome {
            success: true,
            message: format!("Returned to {}. {}", stage, write.message),
            rejection: None,
            persisted_status: Some(new_status.to_string()),
            strategy: Some(write.strategy),
            new_loan_id: write.new_loan_id,
            advisory_failures,
        })
    }

    fn rejected(&self, rejection: Rejection) -> TransitionOutcome {
        info!(reason = %rejection, "Recall rejected");
        TransitionOutcome::rejected(rejection, vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryRecordStore, LoanApplicationRecord, StoreError};

    fn coordinator_with(status: &str) -> (RecallCoordinator, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new().with_loan(
            LoanApplicationRecord::submitted("loan-1", "LA-1").with_status(status),
        ));
        let writer = ResilientStatusWriter::new(store.clone());
        (RecallCoordinator::new(store.clone(), writer), store)
    }

    #[tokio::test]
    async fn test_recall_defaults_to_predecessor() {
        let (recalls, store) = coordinator_with("contract_generated");
        let outcome = recalls
            .recall_loan("loan-1", "officer-1", "wrong contract template", None)
            .await
            .unwrap();

        assert!(outcome.success);
        let records = store.recall_records("loan-1");
        assert_eq!(records[0].recalled_from_stage, WorkflowStage::ContractUpload);
        assert_eq!(records[0].recalled_to_stage, WorkflowStage::ContractGeneration);
        assert_eq!(store.loan("loan-1").unwrap().status, "recalled");
    }

    #[tokio::test]
    async fn test_recall_bypasses_cascade() {
        let (recalls, store) = coordinator_with("under_review");
        store.reject_field_set(FieldSet::StatusOnly);

        let result = recalls
            .recall_loan("loan-1", "officer-1", "incomplete file", None)
            .await;

        assert!(matches!(result, Err(WorkflowError::Store(_))));
        assert_eq!(store.call_count("update_loan"), 1);
        assert_eq!(store.call_count("insert_loan"), 0);
    }

    #[tokio::test]
    async fn test_blank_reason_rejected() {
        let (recalls, store) = coordinator_with("under_review");
        let outcome = recalls.recall_loan("loan-1", "officer-1", "   ", None).await.unwrap();

        assert_eq!(outcome.rejection, Some(Rejection::MissingReason));
        assert_eq!(store.call_count("insert_recall_record"), 0);
    }

    #[tokio::test]
    async fn test_recall_record_failure_leaves_status_alone() {
        let (recalls, store) = coordinator_with("approved");
        store.set_recalls_unavailable(true);

        let result = recalls
            .recall_loan("loan-1", "officer-1", "pricing error", None)
            .await;

        assert!(matches!(result, Err(WorkflowError::Store(StoreError::Unavailable { .. }))));
        assert_eq!(store.call_count("update_loan"), 0);
        assert_eq!(store.loan("loan-1").unwrap().status, "approved");
    }

    #[tokio::test]
    async fn test_explicit_target_must_be_earlier() {
        let (recalls, _) = coordinator_with("contract_uploaded");
        let outcome = recalls
            .recall_loan("loan-1", "officer-1", "re-check", Some(WorkflowStage::Disbursement))
            .await
            .unwrap();

        assert_eq!(
            outcome.rejection,
            Some(Rejection::InvalidRecallTarget {
                current: WorkflowStage::Verification,
                target: WorkflowStage::Disbursement,
            })
        );
    }

    #[tokio::test]
    async fn test_resubmit_restores_recall_target() {
        let (recalls, store) = coordinator_with("contract_uploaded");
        recalls
            .recall_loan("loan-1", "officer-1", "re-assess", Some(WorkflowStage::Assessment))
            .await
            .unwrap();

        let outcome = recalls
            .resubmit_recalled_loan("loan-1", "officer-1", None)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(store.loan("loan-1").unwrap().status, "under_review");
        let again = recalls.resubmit_recalled_loan("loan-1", "officer-1", None).await.unwrap();
        assert!(matches!(again.rejection, Some(Rejection::NotRecalled { .. })));
    }

    #[tokio::test]
    async fn test_rejected_loan_is_not_recallable() {
        let (recalls, store) = coordinator_with("rejected");
        let outcome = recalls
            .recall_loan("loan-1", "officer-1", "second look", None)
            .await
            .unwrap();

        assert!(matches!(outcome.rejection, Some(Rejection::NotRecallable { .. })));
        assert_eq!(store.call_count("insert_recall_record"), 0);
        assert_eq!(store.loan("loan-1").unwrap().status, "rejected");
    }

    #[tokio::test]
    async fn test_reopen_returns_rejected_loan_to_assessment() {
        let (recalls, store) = coordinator_with("rejected");
        let outcome = recalls
            .reopen_rejected_loan("loan-1", "officer-1", Some("new collateral"))
            .await
            .unwrap();

        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.persisted_status.as_deref(), Some("under_review"));
        assert_eq!(store.loan("loan-1").unwrap().status, "under_review");

        let again = recalls.reopen_rejected_loan("loan-1", "officer-1", None).await.unwrap();
        assert_eq!(
            again.rejection,
            Some(Rejection::NotRejected {
                status: "under_review".to_string()
            })
        );
    }
}
