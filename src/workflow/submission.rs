//! Forward progress: guard, intent record, status write, audit step.
//!
//! Only the status write is load-bearing. Intent and audit records are advisory,
//! and nothing here is transactional: two concurrent submissions for the same
//! (loan, target) can both pass the guard before either persists.

use std::sync::Arc;
use tracing::{info, warn};

use super::audit::AuditRecorder;
use super::errors::{AdvisoryFailure, AdvisoryStep, Rejection, WorkflowError};
use super::guard::TransitionGuard;
use super::types::{AdvisoryMode, TransitionOutcome, WorkflowStage};
use super::writer::ResilientStatusWriter;
use crate::store::{RecordStore, SubmissionIntent};

#[derive(Clone)]
pub struct SubmissionCoordinator {
    store: Arc<dyn RecordStore>,
    guard: TransitionGuard,
    writer: ResilientStatusWriter,
    audit: AuditRecorder,
    advisory_mode: AdvisoryMode,
}

impl SubmissionCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        guard: TransitionGuard,
        writer: ResilientStatusWriter,
        advisory_mode: AdvisoryMode,
    ) -> Self {
        Self {
            audit: AuditRecorder::new(store.clone()),
            store,
            guard,
            writer,
            advisory_mode,
        }
    }

    pub async fn submit_to_next_stage(
        &self,
        loan_id: &str,
        target: WorkflowStage,
        user_id: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let decision = self
            .guard
            .can_submit_to_next_stage(loan_id, target, user_id)
            .await?;
        let mut advisory_failures = decision.advisory_failures;
        if let Some(rejection) = decision.reason {
            return Ok(TransitionOutcome::rejected(rejection, advisory_failures));
        }
        let Some(state) = decision.current_state else {
            let rejection = Rejection::NotFound {
                loan_id: loan_id.to_string(),
            };
            return Ok(TransitionOutcome::rejected(rejection, advisory_failures));
        };

        let Some(new_status) = target.persisted_status() else {
            let rejection = Rejection::OutOfOrder {
                current: state.current_stage,
                target,
            };
            return Ok(TransitionOutcome::rejected(rejection, advisory_failures));
        };

        let intent =
            SubmissionIntent::pending(loan_id, state.current_stage, target, user_id, notes);
        let intent_recorded = match self.store.insert_submission_intent(&intent).await {
            Ok(()) => true,
            Err(e) => {
                if self.advisory_mode == AdvisoryMode::Strict {
                    let rejection = Rejection::AdvisoryStoreUnavailable {
                        reason: e.to_string(),
                    };
                    return Ok(TransitionOutcome::rejected(rejection, advisory_failures));
                }
                warn!(loan_id = %loan_id, error = %e, "Failed to record submission intent");
                advisory_failures.push(AdvisoryFailure::new(AdvisoryStep::IntentInsert, &e));
                false
            }
        };

        let write = self
            .writer
            .update_loan_status(loan_id, new_status, Some(user_id))
            .await?;

        if intent_recorded {
            if let Err(e) = self.store.complete_submission_intent(&intent.id).await {
                warn!(loan_id = %loan_id, error = %e, "Failed to mark submission intent completed");
                advisory_failures.push(AdvisoryFailure::new(AdvisoryStep::IntentComplete, &e));
            }
        }

        let effective_id = write.new_loan_id.as_deref().unwrap_or(loan_id);
        let step_name = format!("submitted_to_{}", target);
        if let Some(failure) = self
            .audit
            .record_step(effective_id, &step_name, user_id, notes)
            .await
        {
            advisory_failures.push(failure);
        }

        info!(
            loan_id = %loan_id,
            from = %state.current_stage,
            to = %target,
            status = %new_status,
            strategy = write.strategy,
            "Loan application advanced"
        );

        Ok(TransitionOutcome {
            success: true,
            message: format!("Submitted to {}. {}", target, write.message),
            rejection: None,
            persisted_status: Some(new_status.to_string()),
            strategy: Some(write.strategy),
            new_loan_id: write.new_loan_id,
            advisory_failures,
        })
    }
}
