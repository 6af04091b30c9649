// Check-then-act window between the pending-intent lookup and the intent insert.
// Two submissions for the same (loan, target) that both pass the lookup before
// either inserts are both accepted.

mod fixtures;

use async_trait::async_trait;
use fixtures::{LOAN_ID, OFFICER};
use loan_workflow::store::{
    InMemoryRecordStore, LoanApplicationRecord, LoanFieldUpdate, RecallRecord, RecordStore,
    StoreError, SubmissionIntent, WorkflowStepRecord,
};
use loan_workflow::{EngineSettings, InMemoryApprovalGate, WorkflowEngine, WorkflowStage};
use std::sync::Arc;
use tokio::sync::Barrier;

/// Delegates to the in-memory store, holding every pending-intent lookup at a
/// barrier until both submissions have reached it
struct RacingStore {
    inner: Arc<InMemoryRecordStore>,
    barrier: Barrier,
}

#[async_trait]
impl RecordStore for RacingStore {
    async fn fetch_loan(&self, id: &str) -> Result<Option<LoanApplicationRecord>, StoreError> {
        self.inner.fetch_loan(id).await
    }

    async fn update_loan(&self, id: &str, update: &LoanFieldUpdate) -> Result<(), StoreError> {
        self.inner.update_loan(id, update).await
    }

    async fn insert_loan(&self, record: &LoanApplicationRecord) -> Result<(), StoreError> {
        self.inner.insert_loan(record).await
    }

    async fn insert_audit_step(&self, step: &WorkflowStepRecord) -> Result<(), StoreError> {
        self.inner.insert_audit_step(step).await
    }

    async fn query_audit_steps(&self, loan_id: &str) -> Result<Vec<WorkflowStepRecord>, StoreError> {
        self.inner.query_audit_steps(loan_id).await
    }

    async fn insert_submission_intent(&self, intent: &SubmissionIntent) -> Result<(), StoreError> {
        self.inner.insert_submission_intent(intent).await
    }

    async fn find_pending_intent(
        &self,
        loan_id: &str,
        target: WorkflowStage,
    ) -> Result<Option<SubmissionIntent>, StoreError> {
        let found = self.inner.find_pending_intent(loan_id, target).await;
        self.barrier.wait().await;
        found
    }

    async fn complete_submission_intent(&self, intent_id: &str) -> Result<(), StoreError> {
        self.inner.complete_submission_intent(intent_id).await
    }

    async fn insert_recall_record(&self, record: &RecallRecord) -> Result<(), StoreError> {
        self.inner.insert_recall_record(record).await
    }

    async fn latest_recall_record(&self, loan_id: &str) -> Result<Option<RecallRecord>, StoreError> {
        self.inner.latest_recall_record(loan_id).await
    }
}

#[tokio::test]
async fn racing_submissions_both_pass_the_duplicate_check() {
    let inner = Arc::new(
        InMemoryRecordStore::new().with_loan(LoanApplicationRecord::submitted(LOAN_ID, "LA-20240301-000042")),
    );
    let store = Arc::new(RacingStore {
        inner: inner.clone(),
        barrier: Barrier::new(2),
    });
    let gate = Arc::new(InMemoryApprovalGate::with_default_levels());
    let engine = WorkflowEngine::new(store, gate, EngineSettings::default());

    let (first, second) = tokio::join!(
        engine.submit_to_next_stage(LOAN_ID, WorkflowStage::Assessment, OFFICER, None),
        engine.submit_to_next_stage(LOAN_ID, WorkflowStage::Assessment, "officer-9", None),
    );

    assert!(first.unwrap().success);
    assert!(second.unwrap().success);
    assert_eq!(inner.intents(LOAN_ID).len(), 2);
    assert_eq!(inner.loan(LOAN_ID).unwrap().status, "under_review");
}

#[tokio::test]
async fn sequential_duplicate_is_refused_while_intent_is_pending() {
    let store = Arc::new(
        InMemoryRecordStore::new().with_loan(LoanApplicationRecord::submitted(LOAN_ID, "LA-20240301-000042")),
    );
    let pending = SubmissionIntent::pending(
        LOAN_ID,
        WorkflowStage::Submitted,
        WorkflowStage::Assessment,
        "officer-9",
        None,
    );
    store.insert_submission_intent(&pending).await.unwrap();

    let gate = Arc::new(InMemoryApprovalGate::with_default_levels());
    let engine = WorkflowEngine::new(store.clone(), gate, EngineSettings::default());

    let outcome = engine
        .submit_to_next_stage(LOAN_ID, WorkflowStage::Assessment, OFFICER, None)
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(store.call_count("update_loan"), 0);
}
