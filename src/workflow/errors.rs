use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::types::WorkflowStage;
use crate::store::StoreError;

/// Structured reason a transition request was refused.
///
/// Rejections are returned as values on a `TransitionOutcome` or `GuardDecision`,
/// never as errors, so callers can render them directly.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    #[error("Loan application {loan_id} not found")]
    NotFound { loan_id: String },

    #[error("Loan application is locked in status '{status}' and accepts no further transitions")]
    Locked { status: String },

    #[error("Loan application has been recalled and must be resubmitted before it can advance")]
    Recalled,

    #[error("Loan application was rejected and must be reopened before it can advance")]
    Rejected,

    #[error("Loan application workflow is already completed")]
    Completed,

    #[error("Cannot submit to '{target}': loan application is already at '{current}'")]
    OutOfOrder {
        current: WorkflowStage,
        target: WorkflowStage,
    },

    #[error("A submission to '{target}' is already pending for this loan application")]
    AlreadyPending { target: WorkflowStage },

    #[error("Approval is required before entering '{target}' (approval status: {})", .approval_status.as_deref().unwrap_or("none"))]
    ApprovalRequired {
        target: WorkflowStage,
        approval_status: Option<String>,
    },

    #[error("Loan application cannot be recalled from stage '{stage}' (status '{status}')")]
    NotRecallable { stage: WorkflowStage, status: String },

    #[error("A reason is required to recall a loan application")]
    MissingReason,

    #[error("Cannot recall to '{target}': it is not earlier than the current stage '{current}'")]
    InvalidRecallTarget {
        current: WorkflowStage,
        target: WorkflowStage,
    },

    #[error("Loan application is in status '{status}', not recalled; nothing to resubmit")]
    NotRecalled { status: String },

    #[error("Loan application is in status '{status}', not rejected; nothing to reopen")]
    NotRejected { status: String },

    #[error("Submission intent store is unavailable: {reason}")]
    AdvisoryStoreUnavailable { reason: String },
}

/// One attempted persistence strategy inside the resilience cascade
#[derive(Debug, Clone, Serialize)]
pub struct StrategyAttempt {
    pub strategy: &'static str,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Errors callers should treat as unexpected
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Loan application {0} not found")]
    NotFound(String),

    #[error("All {} persistence strategies failed for loan application {loan_id}", .attempts.len())]
    PersistenceExhausted {
        loan_id: String,
        attempts: Vec<StrategyAttempt>,
    },

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

/// Advisory step whose failure is tolerated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryStep {
    IntentLookup,
    IntentInsert,
    IntentComplete,
    AuditAppend,
}

impl fmt::Display for AdvisoryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdvisoryStep::IntentLookup => "intent_lookup",
            AdvisoryStep::IntentInsert => "intent_insert",
            AdvisoryStep::IntentComplete => "intent_complete",
            AdvisoryStep::AuditAppend => "audit_append",
        };
        f.write_str(name)
    }
}

/// Failure of an advisory write or read; logged and reported, never raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvisoryFailure {
    pub step: AdvisoryStep,
    pub reason: String,
}

impl AdvisoryFailure {
    pub fn new(step: AdvisoryStep, error: &StoreError) -> Self {
        Self {
            step,
            reason: error.to_string(),
        }
    }
}

impl fmt::Display for AdvisoryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.reason)
    }
}
