use crate::store::archive::ArchiveError;
use crate::store::record::WorkflowStatus;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow `{workflow_id}` already exists")]
    DuplicateId { workflow_id: String },
    #[error("workflow `{workflow_id}` not found")]
    NotFound { workflow_id: String },
    #[error("workflow `{workflow_id}` version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        workflow_id: String,
        expected: u64,
        actual: u64,
    },
    #[error("workflow `{workflow_id}` is {status}: {reason}")]
    InvalidState {
        workflow_id: String,
        status: WorkflowStatus,
        reason: String,
    },
    #[error("workflow `{workflow_id}` already applied step {step_index}")]
    AlreadyApplied { workflow_id: String, step_index: u32 },
    #[error("workflow `{workflow_id}` invariant violated: {reason}")]
    InvariantViolation { workflow_id: String, reason: String },
    #[error("invalid {column} `{value}` in database: {reason}")]
    InvalidRow {
        column: &'static str,
        value: String,
        reason: String,
    },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create state database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("workflow `{workflow_id}` record json failed: {source}")]
    Json {
        workflow_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("workflow `{workflow_id}` archive write failed: {source}")]
    Archive {
        workflow_id: String,
        #[source]
        source: ArchiveError,
    },
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}
