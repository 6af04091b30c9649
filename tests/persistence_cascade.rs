// Status write cascade behaviour against a backend that refuses some updates

mod fixtures;

use fixtures::{harness, harness_with, LOAN_ID, OFFICER};
use loan_workflow::store::FieldSet;
use loan_workflow::{EngineSettings, WorkflowError, WorkflowStage};

#[tokio::test]
async fn first_strategy_success_stops_the_cascade() {
    let h = harness("submitted", None);

    let outcome = h
        .engine
        .update_loan_status(LOAN_ID, "under_review", Some(OFFICER))
        .await
        .unwrap();

    assert_eq!(outcome.strategy, "status_only");
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(h.store.call_count("update_loan"), 1);
    assert_eq!(h.store.call_count("insert_loan"), 0);
}

#[tokio::test]
async fn escalates_until_a_field_set_is_accepted() {
    let h = harness("submitted", None);
    h.store.reject_field_set(FieldSet::StatusOnly);
    h.store.reject_field_set(FieldSet::StatusWithUpdatedAt);

    let outcome = h
        .engine
        .update_loan_status(LOAN_ID, "under_review", Some(OFFICER))
        .await
        .unwrap();

    assert_eq!(outcome.strategy, "status_with_timestamps");
    let failed: Vec<_> = outcome
        .attempts
        .iter()
        .filter(|a| !a.succeeded)
        .map(|a| a.strategy)
        .collect();
    assert_eq!(failed, vec!["status_only", "status_with_updated_at"]);
    assert!(h.store.loan(LOAN_ID).unwrap().status_changed_at.is_some());
}

#[tokio::test]
async fn record_replacement_yields_a_distinct_record() {
    let h = harness("approved", Some("generated"));
    h.store.reject_all_updates();

    let outcome = h
        .engine
        .submit_to_next_stage(LOAN_ID, WorkflowStage::ContractUpload, OFFICER, None)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.strategy, Some("record_replacement"));
    let new_id = outcome.new_loan_id.clone().expect("replacement id");
    assert_ne!(new_id, LOAN_ID);
    assert!(outcome.message.contains(&new_id));

    let original = h.store.loan(LOAN_ID).unwrap();
    assert_eq!(original.status, "approved");

    let replacement = h.store.loan(&new_id).unwrap();
    assert_eq!(replacement.status, "contract_generated");
    assert_eq!(replacement.replaces_id.as_deref(), Some(LOAN_ID));
    assert_eq!(replacement.amount, original.amount);
    assert_ne!(replacement.application_number, original.application_number);
    assert!(replacement.application_number.starts_with("LA-"));

    // Audit step follows the record that now carries the status
    let steps = h.engine.get_workflow_history(&new_id).await.unwrap();
    assert_eq!(steps[0].step_name, "submitted_to_contract_upload");
}

#[tokio::test]
async fn exhausted_cascade_is_an_error() {
    let h = harness("submitted", None);
    h.store.reject_all_updates();
    h.store.set_reject_loan_inserts(true);

    let err = h
        .engine
        .submit_to_next_stage(LOAN_ID, WorkflowStage::Assessment, OFFICER, None)
        .await
        .unwrap_err();

    match err {
        WorkflowError::PersistenceExhausted { loan_id, attempts } => {
            assert_eq!(loan_id, LOAN_ID);
            assert_eq!(attempts.len(), 4);
            assert!(attempts.iter().all(|a| !a.succeeded && a.error.is_some()));
        }
        other => panic!("expected PersistenceExhausted, got {other:?}"),
    }
    assert_eq!(h.store.loan(LOAN_ID).unwrap().status, "submitted");
}

#[tokio::test]
async fn replacement_can_be_disabled() {
    let settings = EngineSettings {
        enable_record_replacement: false,
        ..EngineSettings::default()
    };
    let h = harness_with("submitted", None, settings);
    h.store.reject_all_updates();

    let err = h
        .engine
        .update_loan_status(LOAN_ID, "under_review", None)
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::PersistenceExhausted { ref attempts, .. } if attempts.len() == 3));
    assert_eq!(h.store.call_count("insert_loan"), 0);
}
