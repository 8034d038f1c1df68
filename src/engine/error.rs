use crate::config::ConfigError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("resume for workflow `{workflow_id}` is stale: {reason}")]
    StaleResume { workflow_id: String, reason: String },
    #[error("unknown workflow type `{workflow_type}`")]
    UnknownWorkflowType { workflow_type: String },
    #[error("workflow `{workflow_id}` step {step_index} was superseded: {reason}")]
    Superseded {
        workflow_id: String,
        step_index: u32,
        reason: String,
    },
    #[error("workflow `{workflow_id}` lost {attempts} consecutive version races")]
    ContentionExhausted { workflow_id: String, attempts: u32 },
    #[error("invalid identifier: {0}")]
    InvalidId(String),
    #[error("randomness unavailable: {0}")]
    Randomness(String),
    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, EngineError::Store(err) if err.is_version_conflict())
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
