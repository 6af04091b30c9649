//! Approval gate abstraction
//!
//! The approval subsystem is an external collaborator. The workflow engine only
//! consumes its `approval_status == "approved"` predicate for gated stages.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::store::StoreError;
pub use memory::InMemoryApprovalGate;

pub const APPROVED: &str = "approved";

/// A sign-off tier, selected by loan amount and client type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalLevel {
    pub id: String,
    pub name: String,
    /// Lower ranks are tried first
    pub rank: u32,
    pub min_amount: f64,
    /// Exclusive upper bound; `None` means unbounded
    pub max_amount: Option<f64>,
    /// Client types this level applies to; empty applies to all
    pub client_types: Vec<String>,
}

impl ApprovalLevel {
    pub fn covers(&self, amount: f64, client_type: &str) -> bool {
        let in_band = amount >= self.min_amount && self.max_amount.map_or(true, |max| amount < max);
        let client_ok =
            self.client_types.is_empty() || self.client_types.iter().any(|c| c == client_type);
        in_band && client_ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalAssignment {
    pub id: String,
    pub loan_application_id: String,
    pub level_id: String,
    pub assigned_user_id: Option<String>,
    pub initiated_by: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Approval subsystem's view of a loan application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalWorkflowState {
    pub loan_application_id: String,
    pub approval_status: String,
    pub current_level_id: Option<String>,
    pub assigned_user_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalWorkflowState {
    pub fn is_approved(&self) -> bool {
        self.approval_status == APPROVED
    }
}

/// Yes/no gate on stage-sensitive transitions
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Lowest-ranked level covering this amount and client type
    async fn determine_approval_level(
        &self,
        amount: f64,
        client_type: &str,
    ) -> Result<Option<ApprovalLevel>, StoreError>;

    async fn create_approval_assignment(
        &self,
        loan_id: &str,
        level_id: &str,
        assigned_user_id: Option<String>,
        initiated_by: &str,
    ) -> Result<ApprovalAssignment, StoreError>;

    async fn get_approval_workflow_state(
        &self,
        loan_id: &str,
    ) -> Result<Option<ApprovalWorkflowState>, StoreError>;
}

/// Pick the lowest-ranked level covering the request
pub fn select_level<'a>(
    levels: impl IntoIterator<Item = &'a ApprovalLevel>,
    amount: f64,
    client_type: &str,
) -> Option<&'a ApprovalLevel> {
    levels
        .into_iter()
        .filter(|level| level.covers(amount, client_type))
        .min_by_key(|level| level.rank)
}
