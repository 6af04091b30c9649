use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{select_level, ApprovalAssignment, ApprovalGate, ApprovalLevel, ApprovalWorkflowState};
use crate::store::StoreError;

#[derive(Debug, Default)]
struct GateState {
    assignments: Vec<ApprovalAssignment>,
    states: HashMap<String, ApprovalWorkflowState>,
    unavailable: bool,
}

/// Approval gate backed by an in-memory table, for tests and embedders
#[derive(Debug, Default)]
pub struct InMemoryApprovalGate {
    levels: Vec<ApprovalLevel>,
    state: Mutex<GateState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryApprovalGate {
    pub fn new(levels: Vec<ApprovalLevel>) -> Self {
        Self {
            levels,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Officer / branch manager / credit committee tiers
    pub fn with_default_levels() -> Self {
        Self::new(vec![
            ApprovalLevel {
                id: "loan_officer".to_string(),
                name: "Loan Officer".to_string(),
                rank: 1,
                min_amount: 0.0,
                max_amount: Some(50_000.0),
                client_types: vec![],
            },
            ApprovalLevel {
                id: "branch_manager".to_string(),
                name: "Branch Manager".to_string(),
                rank: 2,
                min_amount: 50_000.0,
                max_amount: Some(250_000.0),
                client_types: vec![],
            },
            ApprovalLevel {
                id: "credit_committee".to_string(),
                name: "Credit Committee".to_string(),
                rank: 3,
                min_amount: 250_000.0,
                max_amount: None,
                client_types: vec![],
            },
        ])
    }

    /// Record the approval subsystem's decision for a loan
    pub fn set_approval_status(&self, loan_id: &str, approval_status: &str) {
        let mut state = lock(&self.state);
        let entry = state
            .states
            .entry(loan_id.to_string())
            .or_insert_with(|| ApprovalWorkflowState {
                loan_application_id: loan_id.to_string(),
                approval_status: approval_status.to_string(),
                current_level_id: None,
                assigned_user_id: None,
                updated_at: Utc::now(),
            });
        entry.approval_status = approval_status.to_string();
        entry.updated_at = Utc::now();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    pub fn assignments(&self, loan_id: &str) -> Vec<ApprovalAssignment> {
        lock(&self.state)
            .assignments
            .iter()
            .filter(|a| a.loan_application_id == loan_id)
            .cloned()
            .collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if lock(&self.state).unavailable {
            return Err(StoreError::Unavailable {
                store: "approval",
                reason: "simulated outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ApprovalGate for InMemoryApprovalGate {
    async fn determine_approval_level(
        &self,
        amount: f64,
        client_type: &str,
    ) -> Result<Option<ApprovalLevel>, StoreError> {
        self.check_available()?;
        Ok(select_level(&self.levels, amount, client_type).cloned())
    }

    async fn create_approval_assignment(
        &self,
        loan_id: &str,
        level_id: &str,
        assigned_user_id: Option<String>,
        initiated_by: &str,
    ) -> Result<ApprovalAssignment, StoreError> {
        self.check_available()?;
        if !self.levels.iter().any(|l| l.id == level_id) {
            return Err(StoreError::NotFound {
                id: level_id.to_string(),
            });
        }

        let now = Utc::now();
        let assignment = ApprovalAssignment {
            id: Uuid::new_v4().to_string(),
            loan_application_id: loan_id.to_string(),
            level_id: level_id.to_string(),
            assigned_user_id: assigned_user_id.clone(),
            initiated_by: initiated_by.to_string(),
            status: "pending".to_string(),
            created_at: now,
        };

        let mut state = lock(&self.state);
        state.assignments.push(assignment.clone());
        state.states.insert(
            loan_id.to_string(),
            ApprovalWorkflowState {
                loan_application_id: loan_id.to_string(),
                approval_status: "pending".to_string(),
                current_level_id: Some(level_id.to_string()),
                assigned_user_id,
                updated_at: now,
            },
        );
        Ok(assignment)
    }

    async fn get_approval_workflow_state(
        &self,
        loan_id: &str,
    ) -> Result<Option<ApprovalWorkflowState>, StoreError> {
        self.check_available()?;
        Ok(lock(&self.state).states.get(loan_id).cloned())
    }
}
