// Loan Workflow Library - Stage-Ordered Loan Application Workflow
// This exposes the core components for testing and integration

pub mod approval;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod store;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use approval::{ApprovalGate, ApprovalLevel, ApprovalWorkflowState, InMemoryApprovalGate};
pub use config::{config, init_config, LoanWorkflowConfig};
#[cfg(feature = "database")]
pub use database::DatabaseManager;
pub use store::{InMemoryRecordStore, LoanApplicationRecord, RecordStore, StoreError};
pub use telemetry::{create_workflow_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflow::{
    AdvisoryMode, ComprehensiveWorkflowStatus, EngineSettings, GuardDecision, Rejection,
    TransitionOutcome, WorkflowEngine, WorkflowError, WorkflowStage, WorkflowState, WorkflowStatus,
};
