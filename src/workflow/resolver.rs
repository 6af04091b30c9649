//! Derives the canonical workflow state from persisted loan fields.

use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::WorkflowError;
use super::types::{status, WorkflowStage, WorkflowState, WorkflowStatus};
use crate::store::{LoanApplicationRecord, RecordStore, StoreError};

/// (status, contract_status, stage). `None` contract status matches anything;
/// the first matching row wins, so refinements precede wildcards.
const STAGE_TABLE: &[(&str, Option<&str>, WorkflowStage)] = &[
    (status::PENDING, None, WorkflowStage::Submitted),
    (status::SUBMITTED, None, WorkflowStage::Submitted),
    (status::UNDER_REVIEW, None, WorkflowStage::Assessment),
    (status::REJECTED, None, WorkflowStage::Assessment),
    (status::APPROVED, Some("generated"), WorkflowStage::ContractGeneration),
    (status::APPROVED, None, WorkflowStage::ContractGeneration),
    (status::CONTRACT_GENERATED, Some("uploaded"), WorkflowStage::Verification),
    (status::CONTRACT_GENERATED, None, WorkflowStage::ContractUpload),
    (status::CONTRACT_UPLOADED, None, WorkflowStage::Verification),
    (status::VERIFIED, None, WorkflowStage::Disbursement),
    (status::DISBURSED, None, WorkflowStage::Completed),
    (status::COMPLETED, None, WorkflowStage::Completed),
];

/// Look up the stage for a persisted (status, contract_status) pair
pub fn stage_for(status: &str, contract_status: Option<&str>) -> Option<WorkflowStage> {
    STAGE_TABLE
        .iter()
        .find(|(s, contract, _)| {
            *s == status && contract.map_or(true, |c| contract_status == Some(c))
        })
        .map(|(_, _, stage)| *stage)
}

/// Build the derived state for a stage and persisted status
pub fn derive_state(loan_id: &str, stage: WorkflowStage, persisted_status: &str) -> WorkflowState {
    let is_locked = status::is_locked(persisted_status);
    // A rejected loan only moves again once reopened
    let is_rejected = persisted_status == status::REJECTED;
    WorkflowState {
        loan_application_id: loan_id.to_string(),
        current_stage: stage,
        status: WorkflowStatus::from_persisted(persisted_status),
        can_be_recalled: stage.is_recallable() && !is_locked && !is_rejected,
        next_stage: stage.successor(),
        is_locked,
    }
}

/// A loan record together with its resolved state
#[derive(Debug, Clone)]
pub struct ResolvedLoan {
    pub record: LoanApplicationRecord,
    pub state: WorkflowState,
}

#[derive(Clone)]
pub struct WorkflowStateResolver {
    store: Arc<dyn RecordStore>,
}

impl WorkflowStateResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Resolve the workflow state of a loan; `NotFound` if no record exists
    pub async fn resolve(&self, loan_id: &str) -> Result<WorkflowState, WorkflowError> {
        self.load(loan_id)
            .await?
            .map(|resolved| resolved.state)
            .ok_or_else(|| WorkflowError::NotFound(loan_id.to_string()))
    }

    /// Fetch the record and resolve its state; `None` if the record is absent
    pub async fn load(&self, loan_id: &str) -> Result<Option<ResolvedLoan>, StoreError> {
        let Some(record) = self.store.fetch_loan(loan_id).await? else {
            debug!(loan_id = %loan_id, "No loan application record");
            return Ok(None);
        };
        let stage = self.stage_of(&record).await?;
        let state = derive_state(&record.id, stage, &record.status);
        Ok(Some(ResolvedLoan { record, state }))
    }

    async fn stage_of(&self, record: &LoanApplicationRecord) -> Result<WorkflowStage, StoreError> {
        // A recall flips only the status flag; the stage it left is on the recall record
        if record.status == status::RECALLED {
            return match self.store.latest_recall_record(&record.id).await? {
                Some(recall) => Ok(recall.recalled_from_stage),
                None => {
                    warn!(
                        loan_id = %record.id,
                        "Recalled loan has no recall record, defaulting to submitted"
                    );
                    Ok(WorkflowStage::Submitted)
                }
            };
        }

        match stage_for(&record.status, record.contract_status.as_deref()) {
            Some(stage) => Ok(stage),
            None => {
                warn!(
                    loan_id = %record.id,
                    status = %record.status,
                    contract_status = ?record.contract_status,
                    "Unmapped loan status, defaulting to submitted"
                );
                Ok(WorkflowStage::Submitted)
            }
        }
    }
}
