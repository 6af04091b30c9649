/// Shared builders for loan workflow integration tests
use loan_workflow::store::{InMemoryRecordStore, LoanApplicationRecord};
use loan_workflow::{EngineSettings, InMemoryApprovalGate, WorkflowEngine};
use std::sync::Arc;

pub const LOAN_ID: &str = "loan-0001";
pub const OFFICER: &str = "officer-7";

pub struct Harness {
    pub engine: WorkflowEngine,
    pub store: Arc<InMemoryRecordStore>,
    pub gate: Arc<InMemoryApprovalGate>,
}

/// A single loan application at `status`, with default engine settings
pub fn harness(status: &str, contract_status: Option<&str>) -> Harness {
    harness_with(status, contract_status, EngineSettings::default())
}

pub fn harness_with(status: &str, contract_status: Option<&str>, settings: EngineSettings) -> Harness {
    let mut record = LoanApplicationRecord::submitted(LOAN_ID, "LA-20240301-000042")
        .with_status(status)
        .with_amount(35_000.0, "individual");
    if let Some(contract_status) = contract_status {
        record = record.with_contract_status(contract_status);
    }
    let store = Arc::new(InMemoryRecordStore::new().with_loan(record));
    let gate = Arc::new(InMemoryApprovalGate::with_default_levels());
    Harness {
        engine: WorkflowEngine::new(store.clone(), gate.clone(), settings),
        store,
        gate,
    }
}

/// Every status the resolver maps, paired with the stage it maps to
pub fn status_table() -> Vec<(&'static str, loan_workflow::WorkflowStage)> {
    use loan_workflow::WorkflowStage::*;
    vec![
        ("pending", Submitted),
        ("submitted", Submitted),
        ("under_review", Assessment),
        ("rejected", Assessment),
        ("approved", ContractGeneration),
        ("contract_generated", ContractUpload),
        ("contract_uploaded", Verification),
        ("verified", Disbursement),
        ("disbursed", Completed),
        ("completed", Completed),
    ]
}
