// Core types for the loan application workflow

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::errors::{AdvisoryFailure, Rejection};

/// Persisted `status` strings understood by the workflow engine
pub mod status {
    pub const PENDING: &str = "pending";
    pub const SUBMITTED: &str = "submitted";
    pub const UNDER_REVIEW: &str = "under_review";
    pub const APPROVED: &str = "approved";
    pub const CONTRACT_GENERATED: &str = "contract_generated";
    pub const CONTRACT_UPLOADED: &str = "contract_uploaded";
    pub const VERIFIED: &str = "verified";
    pub const DISBURSED: &str = "disbursed";
    pub const COMPLETED: &str = "completed";
    pub const RECALLED: &str = "recalled";
    pub const REJECTED: &str = "rejected";

    /// Statuses that lock a loan application against any further transition
    pub const LOCKED: [&str; 2] = [DISBURSED, COMPLETED];

    pub fn is_locked(status: &str) -> bool {
        LOCKED.contains(&status)
    }
}

/// The seven ordered stages of a loan application
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Submitted,
    Assessment,
    ContractGeneration,
    ContractUpload,
    Verification,
    Disbursement,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown workflow stage '{0}'")]
pub struct UnknownStage(pub String);

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 7] = [
        WorkflowStage::Submitted,
        WorkflowStage::Assessment,
        WorkflowStage::ContractGeneration,
        WorkflowStage::ContractUpload,
        WorkflowStage::Verification,
        WorkflowStage::Disbursement,
        WorkflowStage::Completed,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStage::Submitted => "submitted",
            WorkflowStage::Assessment => "assessment",
            WorkflowStage::ContractGeneration => "contract_generation",
            WorkflowStage::ContractUpload => "contract_upload",
            WorkflowStage::Verification => "verification",
            WorkflowStage::Disbursement => "disbursement",
            WorkflowStage::Completed => "completed",
        }
    }

    /// Stage-order successor; `Completed` loops back onto itself
    pub fn successor(self) -> WorkflowStage {
        Self::ALL
            .get(self.index() + 1)
            .copied()
            .unwrap_or(WorkflowStage::Completed)
    }

    pub fn predecessor(self) -> Option<WorkflowStage> {
        self.index()
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Stages from which an operator may recall the application
    pub fn is_recallable(self) -> bool {
        matches!(
            self,
            WorkflowStage::Assessment
                | WorkflowStage::ContractGeneration
                | WorkflowStage::ContractUpload
                | WorkflowStage::Verification
        )
    }

    /// Entering these stages requires an approved decision from the approval gate
    pub fn requires_approval(self) -> bool {
        matches!(
            self,
            WorkflowStage::ContractGeneration | WorkflowStage::Disbursement
        )
    }

    /// Status written when a submission targets this stage.
    ///
    /// `Submitted` is never a submission target, so it has no entry.
    pub fn persisted_status(self) -> Option<&'static str> {
        match self {
            WorkflowStage::Submitted => None,
            WorkflowStage::Assessment => Some(status::UNDER_REVIEW),
            WorkflowStage::ContractGeneration => Some(status::APPROVED),
            WorkflowStage::ContractUpload => Some(status::CONTRACT_GENERATED),
            WorkflowStage::Verification => Some(status::CONTRACT_UPLOADED),
            WorkflowStage::Disbursement => Some(status::VERIFIED),
            WorkflowStage::Completed => Some(status::DISBURSED),
        }
    }

    /// Status that places a loan back at rest in this stage (used on resubmission)
    pub fn resting_status(self) -> &'static str {
        self.persisted_status().unwrap_or(status::SUBMITTED)
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Orthogonal status flag carried alongside the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Recalled,
    Rejected,
}

impl WorkflowStatus {
    pub fn from_persisted(status: &str) -> Self {
        match status {
            status::PENDING | status::SUBMITTED => WorkflowStatus::Pending,
            status::DISBURSED | status::COMPLETED => WorkflowStatus::Completed,
            status::RECALLED => WorkflowStatus::Recalled,
            status::REJECTED => WorkflowStatus::Rejected,
            _ => WorkflowStatus::InProgress,
        }
    }
}

/// Canonical view of a loan application's position in the workflow.
///
/// Always derived from persisted fields, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub loan_application_id: String,
    pub current_stage: WorkflowStage,
    pub status: WorkflowStatus,
    pub can_be_recalled: bool,
    pub next_stage: WorkflowStage,
    pub is_locked: bool,
}

/// How the engine treats failures of the advisory stores (submission intents, audit steps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryMode {
    /// Log, record on the outcome and carry on
    #[default]
    Degrade,
    /// Refuse the transition while the intent store is unreachable
    Strict,
}

/// Result of a caller-facing transition (submit, recall, resubmit)
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub success: bool,
    pub message: String,
    pub rejection: Option<Rejection>,
    pub persisted_status: Option<String>,
    pub strategy: Option<&'static str>,
    pub new_loan_id: Option<String>,
    pub advisory_failures: Vec<AdvisoryFailure>,
}

impl TransitionOutcome {
    pub fn rejected(rejection: Rejection, advisory_failures: Vec<AdvisoryFailure>) -> Self {
        Self {
            success: false,
            message: rejection.to_string(),
            rejection: Some(rejection),
            persisted_status: None,
            strategy: None,
            new_loan_id: None,
            advisory_failures,
        }
    }
}
