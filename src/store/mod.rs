//! Record store abstraction
//!
//! The workflow engine reaches the backing database only through the narrow
//! `RecordStore` trait, injected at construction so tests can swap in doubles.

pub mod memory;
pub mod models;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::workflow::types::WorkflowStage;
pub use memory::InMemoryRecordStore;
pub use models::{
    FieldSet, IntentStatus, LoanApplicationRecord, LoanFieldUpdate, RecallRecord,
    SubmissionIntent, WorkflowStepRecord,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{store} store unavailable: {reason}")]
    Unavailable { store: &'static str, reason: String },

    #[error("write rejected by backend: {reason}")]
    Rejected { reason: String },

    #[error("record {id} not found")]
    NotFound { id: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Repository interface over the backing database
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a loan application by id
    async fn fetch_loan(&self, id: &str) -> Result<Option<LoanApplicationRecord>, StoreError>;

    /// Apply a partial update to a loan application
    async fn update_loan(&self, id: &str, update: &LoanFieldUpdate) -> Result<(), StoreError>;

    /// Insert a complete loan application row
    async fn insert_loan(&self, record: &LoanApplicationRecord) -> Result<(), StoreError>;

    /// Append a workflow step to the audit log
    async fn insert_audit_step(&self, step: &WorkflowStepRecord) -> Result<(), StoreError>;

    /// Audit steps for a loan, most recent first
    async fn query_audit_steps(&self, loan_id: &str) -> Result<Vec<WorkflowStepRecord>, StoreError>;

    async fn insert_submission_intent(&self, intent: &SubmissionIntent) -> Result<(), StoreError>;

    /// Pending intent for (loan, target stage), if any
    async fn find_pending_intent(
        &self,
        loan_id: &str,
        target: WorkflowStage,
    ) -> Result<Option<SubmissionIntent>, StoreError>;

    /// Mark an intent completed once its status change has been persisted
    async fn complete_submission_intent(&self, intent_id: &str) -> Result<(), StoreError>;

    async fn insert_recall_record(&self, record: &RecallRecord) -> Result<(), StoreError>;

    /// Most recent recall of a loan, if any
    async fn latest_recall_record(&self, loan_id: &str) -> Result<Option<RecallRecord>, StoreError>;
}
