// In-memory record store with fault injection - no external side effects

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::models::*;
use super::{RecordStore, StoreError};
use crate::workflow::types::WorkflowStage;

/// Failures the in-memory store should simulate
#[derive(Debug, Clone, Default)]
struct FaultPlan {
    /// Field combinations the simulated trigger layer refuses
    pub rejected_field_sets: HashSet<FieldSet>,
    pub reject_loan_inserts: bool,
    pub loans_unavailable: bool,
    pub intents_unavailable: bool,
    /// Refuse intent inserts while lookups keep working
    pub intent_inserts_unavailable: bool,
    pub audit_unavailable: bool,
    pub recalls_unavailable: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    loans: HashMap<String, LoanApplicationRecord>,
    audit_steps: Vec<WorkflowStepRecord>,
    intents: Vec<SubmissionIntent>,
    recalls: Vec<RecallRecord>,
}

/// Record store held entirely in memory.
///
/// Tracks how often each trait method is called so tests can assert which
/// persistence strategies ran.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: Mutex<StoreState>,
    faults: Mutex<FaultPlan>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable(store: &'static str) -> StoreError {
    StoreError::Unavailable {
        store,
        reason: "simulated outage".to_string(),
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loan(self, record: LoanApplicationRecord) -> Self {
        self.seed_loan(record);
        self
    }

    pub fn seed_loan(&self, record: LoanApplicationRecord) {
        lock(&self.state).loans.insert(record.id.clone(), record);
    }

    pub fn reject_field_set(&self, field_set: FieldSet) {
        lock(&self.faults).rejected_field_sets.insert(field_set);
    }

    pub fn reject_all_updates(&self) {
        let mut faults = lock(&self.faults);
        faults.rejected_field_sets.insert(FieldSet::StatusOnly);
        faults.rejected_field_sets.insert(FieldSet::StatusWithUpdatedAt);
        faults.rejected_field_sets.insert(FieldSet::StatusWithTimestamps);
    }

    pub fn set_reject_loan_inserts(&self, reject: bool) {
        lock(&self.faults).reject_loan_inserts = reject;
    }

    pub fn set_loans_unavailable(&self, unavailable: bool) {
        lock(&self.faults).loans_unavailable = unavailable;
    }

    pub fn set_intent_inserts_unavailable(&self, unavailable: bool) {
        lock(&self.faults).intent_inserts_unavailable = unavailable;
    }

    pub fn set_intents_unavailable(&self, unavailable: bool) {
        lock(&self.faults).intents_unavailable = unavailable;
    }

    pub fn set_audit_unavailable(&self, unavailable: bool) {
        lock(&self.faults).audit_unavailable = unavailable;
    }

    pub fn set_recalls_unavailable(&self, unavailable: bool) {
        lock(&self.faults).recalls_unavailable = unavailable;
    }

    /// Number of times a `RecordStore` method was invoked
    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    pub fn loan(&self, id: &str) -> Option<LoanApplicationRecord> {
        lock(&self.state).loans.get(id).cloned()
    }

    pub fn intents(&self, loan_id: &str) -> Vec<SubmissionIntent> {
        lock(&self.state)
            .intents
            .iter()
            .filter(|i| i.loan_application_id == loan_id)
            .cloned()
            .collect()
    }

    pub fn recall_records(&self, loan_id: &str) -> Vec<RecallRecord> {
        lock(&self.state)
            .recalls
            .iter()
            .filter(|r| r.loan_application_id == loan_id)
            .cloned()
            .collect()
    }

    fn record_call(&self, method: &'static str) {
        *lock(&self.calls).entry(method).or_insert(0) += 1;
    }

    fn faults(&self) -> FaultPlan {
        lock(&self.faults).clone()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch_loan(&self, id: &str) -> Result<Option<LoanApplicationRecord>, StoreError> {
        self.record_call("fetch_loan");
        if self.faults().loans_unavailable {
            return Err(unavailable("loan"));
        }
        Ok(self.loan(id))
    }

    async fn update_loan(&self, id: &str, update: &LoanFieldUpdate) -> Result<(), StoreError> {
        self.record_call("update_loan");
        let faults = self.faults();
        if faults.loans_unavailable {
            return Err(unavailable("loan"));
        }
        let field_set = update.field_set();
        if faults.rejected_field_sets.contains(&field_set) {
            debug!(loan_id = %id, ?field_set, "Simulated trigger rejected update");
            return Err(StoreError::Rejected {
                reason: format!("trigger refused field set {:?}", field_set),
            });
        }

        let mut state = lock(&self.state);
        let record = state
            .loans
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        record.status = update.status.clone();
        if let Some(updated_at) = update.updated_at {
            record.updated_at = updated_at;
        }
        if let Some(changed_at) = update.status_changed_at {
            record.status_changed_at = Some(changed_at);
        }
        Ok(())
    }

    async fn insert_loan(&self, record: &LoanApplicationRecord) -> Result<(), StoreError> {
        self.record_call("insert_loan");
        let faults = self.faults();
        if faults.loans_unavailable {
            return Err(unavailable("loan"));
        }
        if faults.reject_loan_inserts {
            return Err(StoreError::Rejected {
                reason: "trigger refused insert".to_string(),
            });
        }
        let mut state = lock(&self.state);
        if state.loans.contains_key(&record.id) {
            return Err(StoreError::Rejected {
                reason: format!("duplicate loan application id {}", record.id),
            });
        }
        state.loans.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn insert_audit_step(&self, step: &WorkflowStepRecord) -> Result<(), StoreError> {
        self.record_call("insert_audit_step");
        if self.faults().audit_unavailable {
            return Err(unavailable("audit"));
        }
        lock(&self.state).audit_steps.push(step.clone());
        Ok(())
    }

    async fn query_audit_steps(&self, loan_id: &str) -> Result<Vec<WorkflowStepRecord>, StoreError> {
        self.record_call("query_audit_steps");
        if self.faults().audit_unavailable {
            return Err(unavailable("audit"));
        }
        let mut steps: Vec<_> = lock(&self.state)
            .audit_steps
            .iter()
            .filter(|s| s.loan_application_id == loan_id)
            .cloned()
            .collect();
        // Later appends win ties on identical timestamps
        steps.reverse();
        steps.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(steps)
    }

    async fn insert_submission_intent(&self, intent: &SubmissionIntent) -> Result<(), StoreError> {
        self.record_call("insert_submission_intent");
        let faults = self.faults();
        if faults.intents_unavailable || faults.intent_inserts_unavailable {
            return Err(unavailable("submission intent"));
        }
        lock(&self.state).intents.push(intent.clone());
        Ok(())
    }

    async fn find_pending_intent(
        &self,
        loan_id: &str,
        target: WorkflowStage,
    ) -> Result<Option<SubmissionIntent>, StoreError> {
        self.record_call("find_pending_intent");
        if self.faults().intents_unavailable {
            return Err(unavailable("submission intent"));
        }
        Ok(lock(&self.state)
            .intents
            .iter()
            .find(|i| {
                i.loan_application_id == loan_id
                    && i.target_stage == target
                    && i.status == IntentStatus::Pending
            })
            .cloned())
    }

    async fn complete_submission_intent(&self, intent_id: &str) -> Result<(), StoreError> {
        self.record_call("complete_submission_intent");
        if self.faults().intents_unavailable {
            return Err(unavailable("submission intent"));
        }
        let mut state = lock(&self.state);
        let intent = state
            .intents
            .iter_mut()
            .find(|i| i.id == intent_id)
            .ok_or_else(|| StoreError::NotFound {
                id: intent_id.to_string(),
            })?;
        intent.status = IntentStatus::Completed;
        Ok(())
    }

    async fn insert_recall_record(&self, record: &RecallRecord) -> Result<(), StoreError> {
        self.record_call("insert_recall_record");
        if self.faults().recalls_unavailable {
            return Err(unavailable("recall"));
        }
        lock(&self.state).recalls.push(record.clone());
        Ok(())
    }

    async fn latest_recall_record(&self, loan_id: &str) -> Result<Option<RecallRecord>, StoreError> {
        self.record_call("latest_recall_record");
        if self.faults().recalls_unavailable {
            return Err(unavailable("recall"));
        }
        Ok(lock(&self.state)
            .recalls
            .iter()
            .filter(|r| r.loan_application_id == loan_id)
            .max_by_key(|r| r.recalled_at)
            .cloned())
    }
}
