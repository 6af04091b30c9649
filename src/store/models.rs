//! Records owned by the backing store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::types::WorkflowStage;

/// A loan application row as persisted by the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplicationRecord {
    pub id: String,
    /// Business identifier shown to operators
    pub application_number: String,
    pub client_id: Option<String>,
    pub client_type: Option<String>,
    pub amount: Option<f64>,
    pub status: String,
    pub contract_status: Option<String>,
    /// Set on rows created by record replacement; points at the row it supersedes
    pub replaces_id: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl LoanApplicationRecord {
    /// New application as created at submission time
    pub fn submitted(id: impl Into<String>, application_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            application_number: application_number.into(),
            client_id: None,
            client_type: None,
            amount: None,
            status: crate::workflow::types::status::SUBMITTED.to_string(),
            contract_status: None,
            replaces_id: None,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
            status_changed_at: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_contract_status(mut self, contract_status: impl Into<String>) -> Self {
        self.contract_status = Some(contract_status.into());
        self
    }

    pub fn with_amount(mut self, amount: f64, client_type: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.client_type = Some(client_type.into());
        self
    }
}

/// Which columns a status update touches.
///
/// The backend's trigger layer accepts or refuses updates by field combination,
/// so the combination is a first-class value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSet {
    StatusOnly,
    StatusWithUpdatedAt,
    StatusWithTimestamps,
}

impl FieldSet {
    pub fn build(self, status: &str, now: DateTime<Utc>) -> LoanFieldUpdate {
        let (updated_at, status_changed_at) = match self {
            FieldSet::StatusOnly => (None, None),
            FieldSet::StatusWithUpdatedAt => (Some(now), None),
            FieldSet::StatusWithTimestamps => (Some(now), Some(now)),
        };
        LoanFieldUpdate {
            status: status.to_string(),
            updated_at,
            status_changed_at,
        }
    }
}

/// Partial update of a loan application row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanFieldUpdate {
    pub status: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl LoanFieldUpdate {
    pub fn field_set(&self) -> FieldSet {
        match (self.updated_at.is_some(), self.status_changed_at.is_some()) {
            (false, false) => FieldSet::StatusOnly,
            (true, false) => FieldSet::StatusWithUpdatedAt,
            _ => FieldSet::StatusWithTimestamps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Completed,
}

impl IntentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Completed => "completed",
        }
    }
}

/// Advisory record of a requested forward transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionIntent {
    pub id: String,
    pub loan_application_id: String,
    pub current_stage: WorkflowStage,
    pub target_stage: WorkflowStage,
    pub submitted_by: String,
    pub status: IntentStatus,
    pub notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionIntent {
    pub fn pending(
        loan_application_id: &str,
        current_stage: WorkflowStage,
        target_stage: WorkflowStage,
        submitted_by: &str,
        notes: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            loan_application_id: loan_application_id.to_string(),
            current_stage,
            target_stage,
            submitted_by: submitted_by.to_string(),
            status: IntentStatus::Pending,
            notes: notes.map(str::to_string),
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallRecord {
    pub id: String,
    pub loan_application_id: String,
    pub recalled_from_stage: WorkflowStage,
    pub recalled_to_stage: WorkflowStage,
    pub recalled_by: String,
    pub reason: String,
    pub recalled_at: DateTime<Utc>,
}

/// Append-only audit entry for a workflow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepRecord {
    pub id: String,
    pub loan_application_id: String,
    pub step_name: String,
    pub status: String,
    pub user_id: String,
    pub notes: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_set_roundtrip() {
        let now = Utc::now();
        for set in [
            FieldSet::StatusOnly,
            FieldSet::StatusWithUpdatedAt,
            FieldSet::StatusWithTimestamps,
        ] {
            let update = set.build("approved", now);
            assert_eq!(update.field_set(), set);
            assert_eq!(update.status, "approved");
        }
    }
}
