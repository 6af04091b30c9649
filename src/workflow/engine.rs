//! Caller-facing entry point wiring the workflow components together.

use serde::Serialize;
use std::sync::Arc;
use tracing::{warn, Instrument};

use super::audit::WorkflowHistoryReader;
use super::errors::WorkflowError;
use super::guard::{GuardDecision, TransitionGuard};
use super::recall::RecallCoordinator;
use super::resolver::WorkflowStateResolver;
use super::submission::SubmissionCoordinator;
use super::types::{AdvisoryMode, TransitionOutcome, WorkflowStage, WorkflowState, WorkflowStatus};
use super::writer::{ResilientStatusWriter, StatusWriteOutcome};
use crate::approval::{ApprovalGate, ApprovalWorkflowState};
use crate::config::LoanWorkflowConfig;
use crate::store::{RecordStore, WorkflowStepRecord};
use crate::telemetry::{create_workflow_span, generate_correlation_id};

/// Runtime knobs for the engine, usually taken from `LoanWorkflowConfig`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub advisory_mode: AdvisoryMode,
    pub enable_record_replacement: bool,
    pub application_number_prefix: String,
    pub history_limit: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            advisory_mode: AdvisoryMode::Degrade,
            enable_record_replacement: true,
            application_number_prefix: "LA".to_string(),
            history_limit: None,
        }
    }
}

impl From<&LoanWorkflowConfig> for EngineSettings {
    fn from(config: &LoanWorkflowConfig) -> Self {
        Self {
            advisory_mode: config.advisory.mode,
            enable_record_replacement: config.persistence.enable_record_replacement,
            application_number_prefix: config.persistence.application_number_prefix.clone(),
            history_limit: config.history.default_limit,
        }
    }
}

/// Everything the presentation layer needs to render a loan's workflow panel
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveWorkflowStatus {
    pub workflow_state: WorkflowState,
    pub approval_state: Option<ApprovalWorkflowState>,
    pub can_proceed: bool,
    pub next_steps: Vec<String>,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    gate: Arc<dyn ApprovalGate>,
    resolver: WorkflowStateResolver,
    guard: TransitionGuard,
    writer: ResilientStatusWriter,
    submissions: SubmissionCoordinator,
    recalls: RecallCoordinator,
    history: WorkflowHistoryReader,
    settings: EngineSettings,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<dyn ApprovalGate>,
        settings: EngineSettings,
    ) -> Self {
        let mut writer = ResilientStatusWriter::new(store.clone())
            .with_application_number_prefix(settings.application_number_prefix.clone());
        if !settings.enable_record_replacement {
            writer = writer.without_record_replacement();
        }
        let guard = TransitionGuard::new(store.clone(), gate.clone(), settings.advisory_mode);

        Self {
            resolver: WorkflowStateResolver::new(store.clone()),
            submissions: SubmissionCoordinator::new(
                store.clone(),
                guard.clone(),
                writer.clone(),
                settings.advisory_mode,
            ),
            recalls: RecallCoordinator::new(store.clone(), writer.clone()),
            history: WorkflowHistoryReader::new(store),
            gate,
            guard,
            writer,
            settings,
        }
    }

    pub async fn get_workflow_state(&self, loan_id: &str) -> Result<WorkflowState, WorkflowError> {
        self.resolver.resolve(loan_id).await
    }

    pub async fn get_workflow_history(
        &self,
        loan_id: &str,
    ) -> Result<Vec<WorkflowStepRecord>, WorkflowError> {
        self.history.history(loan_id, self.settings.history_limit).await
    }

    pub async fn can_submit_to_next_stage(
        &self,
        loan_id: &str,
        target: WorkflowStage,
        user_id: &str,
    ) -> Result<GuardDecision, WorkflowError> {
        self.guard.can_submit_to_next_stage(loan_id, target, user_id).await
    }

    pub async fn can_proceed_to_next_stage(&self, loan_id: &str, target: WorkflowStage) -> bool {
        self.guard.can_proceed_to_next_stage(loan_id, target).await
    }

    pub async fn submit_to_next_stage(
        &self,
        loan_id: &str,
        target: WorkflowStage,
        user_id: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let span = create_workflow_span(
            "submit_to_next_stage",
            loan_id,
            Some(user_id),
            &generate_correlation_id(),
        );
        self.submissions
            .submit_to_next_stage(loan_id, target, user_id, notes)
            .instrument(span)
            .await
    }

    pub async fn recall_loan(
        &self,
        loan_id: &str,
        user_id: &str,
        reason: &str,
        target: Option<WorkflowStage>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let span = create_workflow_span("recall_loan", loan_id, Some(user_id), &generate_correlation_id());
        self.recalls
            .recall_loan(loan_id, user_id, reason, target)
            .instrument(span)
            .await
    }

    pub async fn resubmit_recalled_loan(
        &self,
        loan_id: &str,
        user_id: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let span = create_workflow_span(
            "resubmit_recalled_loan",
            loan_id,
            Some(user_id),
            &generate_correlation_id(),
        );
        self.recalls
            .resubmit_recalled_loan(loan_id, user_id, notes)
            .instrument(span)
            .await
    }

    pub async fn reopen_rejected_loan(
        &self,
        loan_id: &str,
        user_id: &str,
        notes: Option<&str>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let span = create_workflow_span(
            "reopen_rejected_loan",
            loan_id,
            Some(user_id),
            &generate_correlation_id(),
        );
        self.recalls
            .reopen_rejected_loan(loan_id, user_id, notes)
            .instrument(span)
            .await
    }

    /// Direct access to the resilience cascade
    pub async fn update_loan_status(
        &self,
        loan_id: &str,
        new_status: &str,
        user_id: Option<&str>,
    ) -> Result<StatusWriteOutcome, WorkflowError> {
        let span = create_workflow_span("update_loan_status", loan_id, user_id, &generate_correlation_id());
        self.writer
            .update_loan_status(loan_id, new_status, user_id)
            .instrument(span)
            .await
    }

    pub async fn get_comprehensive_workflow_status(
        &self,
        loan_id: &str,
    ) -> Result<ComprehensiveWorkflowStatus, WorkflowError> {
        let workflow_state = self.resolver.resolve(loan_id).await?;
        let approval_state = match self.gate.get_approval_workflow_state(loan_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(loan_id = %loan_id, error = %e, "Approval state unavailable");
                None
            }
        };

        let next = workflow_state.next_stage;
        let has_next = next != workflow_state.current_stage;
        let blocked = workflow_state.is_locked
            || matches!(
                workflow_state.status,
                WorkflowStatus::Recalled | WorkflowStatus::Rejected
            );
        let approval_ok = !next.requires_approval()
            || approval_state.as_ref().is_some_and(|a| a.is_approved());
        let can_proceed = has_next && !blocked && approval_ok;

        let next_steps = next_steps(&workflow_state, has_next, approval_ok);
        Ok(ComprehensiveWorkflowStatus {
            workflow_state,
            approval_state,
            can_proceed,
            next_steps,
        })
    }
}

fn next_steps(state: &WorkflowState, has_next: bool, approval_ok: bool) -> Vec<String> {
    if state.is_locked || !has_next {
        return vec![];
    }
    let mut steps = Vec::new();
    match state.status {
        WorkflowStatus::Recalled => {
            steps.push("Resubmit the recalled application before advancing".to_string());
        }
        WorkflowStatus::Rejected => {
            steps.push("Reopen the rejected application before advancing".to_string());
        }
        _ => {
            if !approval_ok {
                steps.push(format!(
                    "Obtain approval before advancing to {}",
                    state.next_stage
                ));
            } else {
                steps.push(format!("Submit to {}", state.next_stage));
            }
        }
    }
    if state.can_be_recalled && state.status != WorkflowStatus::Recalled {
        steps.push("Recall to an earlier stage if corrections are needed".to_string());
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::InMemoryApprovalGate;
    use crate::store::{InMemoryRecordStore, LoanApplicationRecord};

    fn engine_with(status: &str) -> (WorkflowEngine, Arc<InMemoryApprovalGate>) {
        let store = Arc::new(InMemoryRecordStore::new().with_loan(
            LoanApplicationRecord::submitted("loan-1", "LA-1").with_status(status),
        ));
        let gate = Arc::new(InMemoryApprovalGate::with_default_levels());
        (
            WorkflowEngine::new(store, gate.clone(), EngineSettings::default()),
            gate,
        )
    }

    #[tokio::test]
    async fn test_comprehensive_status_waits_for_approval() {
        let (engine, gate) = engine_with("under_review");

        let status = engine.get_comprehensive_workflow_status("loan-1").await.unwrap();
        assert!(!status.can_proceed);
        assert_eq!(status.next_steps[0], "Obtain approval before advancing to contract_generation");

        gate.set_approval_status("loan-1", "approved");
        let status = engine.get_comprehensive_workflow_status("loan-1").await.unwrap();
        assert!(status.can_proceed);
        assert_eq!(status.next_steps[0], "Submit to contract_generation");
    }

    #[tokio::test]
    async fn test_comprehensive_status_for_locked_loan() {
        let (engine, _) = engine_with("disbursed");
        let status = engine.get_comprehensive_workflow_status("loan-1").await.unwrap();

        assert!(status.workflow_state.is_locked);
        assert!(!status.can_proceed);
        assert!(status.next_steps.is_empty());
    }

    #[tokio::test]
    async fn test_comprehensive_status_for_rejected_loan() {
        let (engine, gate) = engine_with("rejected");
        gate.set_approval_status("loan-1", "approved");

        let status = engine.get_comprehensive_workflow_status("loan-1").await.unwrap();
        assert!(!status.can_proceed);
        assert!(!status.workflow_state.can_be_recalled);
        assert_eq!(status.next_steps, vec!["Reopen the rejected application before advancing"]);

        let reopened = engine.reopen_rejected_loan("loan-1", "officer-1", None).await.unwrap();
        assert!(reopened.success);
        let status = engine.get_comprehensive_workflow_status("loan-1").await.unwrap();
        assert!(status.can_proceed);
        assert_eq!(status.next_steps[0], "Submit to contract_generation");
    }
}
