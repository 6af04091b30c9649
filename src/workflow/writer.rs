//! Status persistence through an ordered cascade of strategies.
//!
//! The backend's trigger layer refuses some field combinations for reasons it
//! does not document. Each strategy widens the set of touched fields; the last
//! one gives up on mutating the row and inserts a replacement record instead.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::errors::{StrategyAttempt, WorkflowError};
use crate::store::{FieldSet, LoanApplicationRecord, RecordStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Update(FieldSet),
    ReplaceRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PersistenceStrategy {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: StrategyKind,
}

pub const STATUS_ONLY: PersistenceStrategy = PersistenceStrategy {
    name: "status_only",
    description: "Update the status field only",
    kind: StrategyKind::Update(FieldSet::StatusOnly),
};

pub const STATUS_WITH_UPDATED_AT: PersistenceStrategy = PersistenceStrategy {
    name: "status_with_updated_at",
    description: "Update status and updated_at",
    kind: StrategyKind::Update(FieldSet::StatusWithUpdatedAt),
};

pub const STATUS_WITH_TIMESTAMPS: PersistenceStrategy = PersistenceStrategy {
    name: "status_with_timestamps",
    description: "Update status, updated_at and status_changed_at",
    kind: StrategyKind::Update(FieldSet::StatusWithTimestamps),
};

pub const RECORD_REPLACEMENT: PersistenceStrategy = PersistenceStrategy {
    name: "record_replacement",
    description: "Insert a replacement record with a new identifier, leaving the original untouched",
    kind: StrategyKind::ReplaceRecord,
};

/// Narrowest mutation first, record replacement last
pub const DEFAULT_CASCADE: [PersistenceStrategy; 4] = [
    STATUS_ONLY,
    STATUS_WITH_UPDATED_AT,
    STATUS_WITH_TIMESTAMPS,
    RECORD_REPLACEMENT,
];

#[derive(Debug, Clone, Serialize)]
pub struct StatusWriteOutcome {
    pub success: bool,
    pub message: String,
    pub strategy: &'static str,
    /// Identifier of the replacement record when strategy 4 ran
    pub new_loan_id: Option<String>,
    pub attempts: Vec<StrategyAttempt>,
}

/// Generate a fresh business identifier, e.g. `LA-20261016-042917`
pub fn generate_application_number(prefix: &str) -> String {
    format!(
        "{}-{}-{:06}",
        prefix,
        Utc::now().format("%Y%m%d"),
        rand::rng().random_range(0..1_000_000u32)
    )
}

#[derive(Clone)]
pub struct ResilientStatusWriter {
    store: Arc<dyn RecordStore>,
    strategies: Vec<PersistenceStrategy>,
    application_number_prefix: String,
}

impl ResilientStatusWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            strategies: DEFAULT_CASCADE.to_vec(),
            application_number_prefix: "LA".to_string(),
        }
    }

    /// Drop the record-replacement strategy from the cascade
    pub fn without_record_replacement(mut self) -> Self {
        self.strategies
            .retain(|s| s.kind != StrategyKind::ReplaceRecord);
        self
    }

    pub fn with_application_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.application_number_prefix = prefix.into();
        self
    }

    pub fn strategies(&self) -> &[PersistenceStrategy] {
        &self.strategies
    }

    /// Persist `new_status`, stopping at the first strategy that succeeds.
    ///
    /// Fails with `PersistenceExhausted` only when every strategy failed.
    pub async fn update_loan_status(
        &self,
        loan_id: &str,
        new_status: &str,
        user_id: Option<&str>,
    ) -> Result<StatusWriteOutcome, WorkflowError> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match self.attempt(strategy, loan_id, new_status, user_id).await {
                Ok(new_loan_id) => {
                    attempts.push(StrategyAttempt {
                        strategy: strategy.name,
                        succeeded: true,
                        error: None,
                    });
                    let message = match &new_loan_id {
                        Some(new_id) => format!(
                            "Status updated to '{}' via record replacement; new loan application id {} replaces {}",
                            new_status, new_id, loan_id
                        ),
                        None => format!(
                            "Status updated to '{}' ({})",
                            new_status, strategy.description
                        ),
                    };
                    info!(
                        loan_id = %loan_id,
                        status = %new_status,
                        strategy = strategy.name,
                        attempts = attempts.len(),
                        new_loan_id = ?new_loan_id,
                        "Loan status persisted"
                    );
                    return Ok(StatusWriteOutcome {
                        success: true,
                        message,
                        strategy: strategy.name,
                        new_loan_id,
                        attempts,
                    });
                }
                Err(e) => {
                    warn!(
                        loan_id = %loan_id,
                        status = %new_status,
                        strategy = strategy.name,
                        error = %e,
                        "Persistence strategy failed, escalating"
                    );
                    attempts.push(StrategyAttempt {
                        strategy: strategy.name,
                        succeeded: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        error!(
            loan_id = %loan_id,
            status = %new_status,
            attempts = attempts.len(),
            "All persistence strategies exhausted"
        );
        Err(WorkflowError::PersistenceExhausted {
            loan_id: loan_id.to_string(),
            attempts,
        })
    }

    async fn attempt(
        &self,
        strategy: &PersistenceStrategy,
        loan_id: &str,
        new_status: &str,
        user_id: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        match strategy.kind {
            StrategyKind::Update(field_set) => {
                let update = field_set.build(new_status, Utc::now());
                self.store.update_loan(loan_id, &update).await?;
                Ok(None)
            }
            StrategyKind::ReplaceRecord => self
                .replace_record(loan_id, new_status, user_id)
                .await
                .map(Some),
        }
    }

    async fn replace_record(
        &self,
        loan_id: &str,
        new_status: &str,
        user_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let original = self
            .store
            .fetch_loan(loan_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                id: loan_id.to_string(),
            })?;

        let now = Utc::now();
        let replacement = LoanApplicationRecord {
            id: Uuid::new_v4().to_string(),
            application_number: generate_application_number(&self.application_number_prefix),
            status: new_status.to_string(),
            replaces_id: Some(original.id.clone()),
            created_by: user_id.map(str::to_string).or_else(|| original.created_by.clone()),
            updated_by: user_id.map(str::to_string),
            created_at: now,
            updated_at: now,
            status_changed_at: Some(now),
            ..original
        };
        self.store.insert_loan(&replacement).await?;
        Ok(replacement.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryRecordStore, MockRecordStore};

    #[test]
    fn test_default_cascade_order() {
        let names: Vec<_> = DEFAULT_CASCADE.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "status_only",
                "status_with_updated_at",
                "status_with_timestamps",
                "record_replacement"
            ]
        );
    }

    #[tokio::test]
    async fn test_first_strategy_success_skips_the_rest() {
        let mut store = MockRecordStore::new();
        store
            .expect_update_loan()
            .withf(|_, update| update.field_set() == FieldSet::StatusOnly)
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_fetch_loan().never();
        store.expect_insert_loan().never();

        let writer = ResilientStatusWriter::new(Arc::new(store));
        let outcome = writer
            .update_loan_status("loan-1", "under_review", Some("officer-1"))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.strategy, "status_only");
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.new_loan_id.is_none());
    }

    #[tokio::test]
    async fn test_escalates_to_broader_field_set() {
        let store = Arc::new(InMemoryRecordStore::new().with_loan(
            LoanApplicationRecord::submitted("loan-1", "LA-1"),
        ));
        store.reject_field_set(FieldSet::StatusOnly);
        store.reject_field_set(FieldSet::StatusWithUpdatedAt);

        let writer = ResilientStatusWriter::new(store.clone());
        let outcome = writer
            .update_loan_status("loan-1", "under_review", None)
            .await
            .unwrap();

        assert_eq!(outcome.strategy, "status_with_timestamps");
        assert_eq!(store.call_count("update_loan"), 3);
        assert_eq!(store.call_count("insert_loan"), 0);
        let record = store.loan("loan-1").unwrap();
        assert_eq!(record.status, "under_review");
        assert!(record.status_changed_at.is_some());
    }

    #[tokio::test]
    async fn test_record_replacement_leaves_original_untouched() {
        let store = Arc::new(InMemoryRecordStore::new().with_loan(
            LoanApplicationRecord::submitted("loan-1", "LA-1").with_amount(12_500.0, "individual"),
        ));
        store.reject_all_updates();

        let writer = ResilientStatusWriter::new(store.clone()).with_application_number_prefix("MF");
        let outcome = writer
            .update_loan_status("loan-1", "approved", Some("officer-1"))
            .await
            .unwrap();

        let new_id = outcome.new_loan_id.clone().expect("replacement id");
        assert_ne!(new_id, "loan-1");
        assert!(outcome.message.contains(&new_id));
        assert_eq!(outcome.strategy, "record_replacement");

        assert_eq!(store.loan("loan-1").unwrap().status, "submitted");
        let replacement = store.loan(&new_id).unwrap();
        assert_eq!(replacement.status, "approved");
        assert_eq!(replacement.replaces_id.as_deref(), Some("loan-1"));
        assert_eq!(replacement.amount, Some(12_500.0));
        assert!(replacement.application_number.starts_with("MF-"));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_attempt() {
        let store = Arc::new(InMemoryRecordStore::new().with_loan(
            LoanApplicationRecord::submitted("loan-1", "LA-1"),
        ));
        store.reject_all_updates();
        store.set_reject_loan_inserts(true);

        let result = ResilientStatusWriter::new(store)
            .update_loan_status("loan-1", "approved", None)
            .await;

        match result {
            Err(WorkflowError::PersistenceExhausted { loan_id, attempts }) => {
                assert_eq!(loan_id, "loan-1");
                assert_eq!(attempts.len(), 4);
                assert!(attempts.iter().all(|a| !a.succeeded));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replacement_can_be_disabled() {
        let store = Arc::new(InMemoryRecordStore::new().with_loan(
            LoanApplicationRecord::submitted("loan-1", "LA-1"),
        ));
        store.reject_all_updates();

        let writer = ResilientStatusWriter::new(store.clone()).without_record_replacement();
        assert_eq!(writer.strategies().len(), 3);
        assert!(writer.update_loan_status("loan-1", "approved", None).await.is_err());
        assert_eq!(store.call_count("insert_loan"), 0);
    }
}
