pub mod audit;
pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod pause;
pub mod retry;
pub mod step;
pub mod sweep;
pub mod workflow_engine;

pub use audit::{AuditEvent, AuditSink, JsonlAuditLog, NoopAuditSink};
pub use checkpoint::{CheckpointManager, StepResult};
pub use error::EngineError;
pub use executor::{run_step_with_timeout, TickOutcome, WorkflowExecutor};
pub use pause::{PauseController, ResumeDelivery, ResumeOutcome};
pub use retry::{RetryPolicy, StepErrorKind};
pub use step::{
    step_idempotency_key, FnStep, PendingActionSpec, StepContext, StepError, StepHandler,
    StepOutcome, WorkflowRegistry,
};
pub use sweep::{SweepReport, Sweeper};
pub use workflow_engine::WorkflowEngine;
