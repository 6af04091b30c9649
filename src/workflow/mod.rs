// Loan application workflow engine
//
// Stage-ordered state machine with approval gating, operator recall and a
// resilient status writer over an unreliable record store.

pub mod audit;
pub mod engine;
pub mod errors;
pub mod guard;
pub mod recall;
pub mod resolver;
pub mod submission;
pub mod types;
pub mod writer;

pub use audit::{AuditRecorder, WorkflowHistoryReader};
pub use engine::{ComprehensiveWorkflowStatus, EngineSettings, WorkflowEngine};
pub use errors::{AdvisoryFailure, AdvisoryStep, Rejection, StrategyAttempt, WorkflowError};
pub use guard::{GuardDecision, TransitionGuard};
pub use recall::RecallCoordinator;
pub use resolver::{WorkflowStateResolver, ResolvedLoan};
pub use submission::SubmissionCoordinator;
pub use types::{AdvisoryMode, TransitionOutcome, WorkflowStage, WorkflowState, WorkflowStatus};
pub use writer::{
    generate_application_number, PersistenceStrategy, ResilientStatusWriter, StatusWriteOutcome, StrategyKind,
    DEFAULT_CASCADE,
};
