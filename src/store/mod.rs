pub mod archive;
pub mod error;
pub mod record;
pub mod sqlite;

pub use archive::{ArchiveError, ArchiveSink, FileArchiveSink};
pub use error::StoreError;
pub use record::{
    ArchivedStep, ArchivedWorkflow, FailureReason, PendingAction, PendingActionKind,
    ResolvedWait, StepRecord, StepStatus, WorkflowRecord, WorkflowStatus,
};
pub use sqlite::SqliteStateStore;

use crate::shared::ids::WorkflowId;

/// Mutation applied inside `StateStore::update`. Returning an error aborts the write.
pub type Mutator<'a> = dyn FnMut(&mut WorkflowRecord) -> Result<(), StoreError> + 'a;

/// Durable workflow persistence with optimistic concurrency.
///
/// Every mutation goes through `update`, which only applies when the stored version equals
/// `expected_version` and bumps the version on success. Terminal records reject updates and
/// can only leave hot storage through `archive`.
pub trait StateStore: Send + Sync {
    fn create(&self, record: &WorkflowRecord) -> Result<WorkflowId, StoreError>;

    fn get(&self, workflow_id: &str) -> Result<WorkflowRecord, StoreError>;

    fn update(
        &self,
        workflow_id: &str,
        mutator: &mut Mutator<'_>,
        expected_version: u64,
    ) -> Result<WorkflowRecord, StoreError>;

    /// Paused workflows whose `timeout_at <= now`, earliest deadline first.
    fn query_expired(&self, now: i64) -> Result<Vec<WorkflowId>, StoreError>;

    /// Active workflows with no retry pending or whose retry is due.
    fn query_runnable(&self, now: i64, limit: usize) -> Result<Vec<WorkflowId>, StoreError>;

    /// Terminal workflows with `completed_at <= cutoff`.
    fn query_terminal_before(&self, cutoff: i64) -> Result<Vec<WorkflowId>, StoreError>;

    fn list(
        &self,
        status: Option<WorkflowStatus>,
        limit: usize,
    ) -> Result<Vec<WorkflowRecord>, StoreError>;

    fn archive(
        &self,
        workflow_id: &str,
        sink: &dyn ArchiveSink,
        now: i64,
    ) -> Result<ArchivedWorkflow, StoreError>;
}
