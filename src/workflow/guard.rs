//! Pure validation of a proposed forward transition.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::errors::{AdvisoryFailure, AdvisoryStep, Rejection, WorkflowError};
use super::resolver::WorkflowStateResolver;
use super::types::{status, AdvisoryMode, WorkflowStage, WorkflowState};
use crate::approval::ApprovalGate;
use crate::store::RecordStore;

/// Outcome of `can_submit_to_next_stage`
#[derive(Debug, Clone, Serialize)]
pub struct GuardDecision {
    pub allowed: bool,
    pub reason: Option<Rejection>,
    pub current_state: Option<WorkflowState>,
    pub advisory_failures: Vec<AdvisoryFailure>,
}

impl GuardDecision {
    fn allow(state: WorkflowState, advisory_failures: Vec<AdvisoryFailure>) -> Self {
        Self {
            allowed: true,
            reason: None,
            current_state: Some(state),
            advisory_failures,
        }
    }

    fn reject(
        rejection: Rejection,
        state: Option<WorkflowState>,
        advisory_failures: Vec<AdvisoryFailure>,
    ) -> Self {
        Self {
            allowed: false,
            reason: Some(rejection),
            current_state: state,
            advisory_failures,
        }
    }

    pub fn message(&self) -> String {
        self.reason
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "Transition allowed".to_string())
    }
}

#[derive(Clone)]
pub struct TransitionGuard {
    store: Arc<dyn RecordStore>,
    gate: Arc<dyn ApprovalGate>,
    resolver: WorkflowStateResolver,
    advisory_mode: AdvisoryMode,
}

impl TransitionGuard {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<dyn ApprovalGate>,
        advisory_mode: AdvisoryMode,
    ) -> Self {
        Self {
            resolver: WorkflowStateResolver::new(store.clone()),
            store,
            gate,
            advisory_mode,
        }
    }

    /// Validate a forward submission, short-circuiting on the first failed check.
    ///
    /// Order: record exists, not locked, not recalled, not rejected, not completed, target after
    /// current, no pending intent for the target, approval for gated targets.
    pub async fn can_submit_to_next_stage(
        &self,
        loan_id: &str,
        target: WorkflowStage,
        user_id: &str,
    ) -> Result<GuardDecision, WorkflowError> {
        let Some(loan) = self.resolver.load(loan_id).await? else {
            return Ok(self.rejected(
                loan_id,
                user_id,
                Rejection::NotFound {
                    loan_id: loan_id.to_string(),
                },
                None,
                vec![],
            ));
        };
        let state = loan.state;
        let persisted = loan.record.status.as_str();

        if state.is_locked {
            let rejection = Rejection::Locked {
                status: persisted.to_string(),
            };
            return Ok(self.rejected(loan_id, user_id, rejection, Some(state), vec![]));
        }
        if persisted == status::RECALLED {
            return Ok(self.rejected(loan_id, user_id, Rejection::Recalled, Some(state), vec![]));
        }
        if persisted == status::REJECTED {
            return Ok(self.rejected(loan_id, user_id, Rejection::Rejected, Some(state), vec![]));
        }
        if persisted == status::COMPLETED {
            return Ok(self.rejected(loan_id, user_id, Rejection::Completed, Some(state), vec![]));
        }
        if target.index() <= state.current_stage.index() {
            let rejection = Rejection::OutOfOrder {
                current: state.current_stage,
                target,
            };
            return Ok(self.rejected(loan_id, user_id, rejection, Some(state), vec![]));
        }

        let mut advisory_failures = Vec::new();
        match self.store.find_pending_intent(loan_id, target).await {
            Ok(Some(_)) => {
                let rejection = Rejection::AlreadyPending { target };
                return Ok(self.rejected(loan_id, user_id, rejection, Some(state), advisory_failures));
            }
            Ok(None) => {}
            Err(e) => match self.advisory_mode {
                AdvisoryMode::Degrade => {
                    warn!(
                        loan_id = %loan_id,
                        error = %e,
                        "Submission intent store unreachable, assuming no pending intent"
                    );
                    advisory_failures.push(AdvisoryFailure::new(AdvisoryStep::IntentLookup, &e));
                }
                AdvisoryMode::Strict => {
                    let rejection = Rejection::AdvisoryStoreUnavailable {
                        reason: e.to_string(),
                    };
                    return Ok(self.rejected(loan_id, user_id, rejection, Some(state), vec![]));
                }
            },
        }

        if let Err(rejection) = self.check_approval(loan_id, target).await {
            return Ok(self.rejected(loan_id, user_id, rejection, Some(state), advisory_failures));
        }

        Ok(GuardDecision::allow(state, advisory_failures))
    }

    /// Whether the approval gate permits entering `target`.
    ///
    /// Ungated stages always pass. Missing or unreadable approval state is a denial.
    pub async fn can_proceed_to_next_stage(&self, loan_id: &str, target: WorkflowStage) -> bool {
        self.check_approval(loan_id, target).await.is_ok()
    }

    async fn check_approval(&self, loan_id: &str, target: WorkflowStage) -> Result<(), Rejection> {
        if !target.requires_approval() {
            return Ok(());
        }
        let approval_status = match self.gate.get_approval_workflow_state(loan_id).await {
            Ok(Some(approval)) if approval.is_approved() => return Ok(()),
            Ok(Some(approval)) => Some(approval.approval_status),
            Ok(None) => None,
            Err(e) => {
                warn!(loan_id = %loan_id, error = %e, "Approval gate unreachable, treating as denial");
                None
            }
        };
        Err(Rejection::ApprovalRequired {
            target,
            approval_status,
        })
    }

    fn rejected(
        &self,
        loan_id: &str,
        user_id: &str,
        rejection: Rejection,
        state: Option<WorkflowState>,
        advisory_failures: Vec<AdvisoryFailure>,
    ) -> GuardDecision {
        info!(
            loan_id = %loan_id,
            user_id = %user_id,
            reason = %rejection,
            "Transition rejected by guard"
        );
        GuardDecision::reject(rejection, state, advisory_failures)
    }
}
