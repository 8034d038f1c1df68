pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_settings_from_state_root, save_settings};
pub use paths::{default_state_root_path, SETTINGS_FILE_NAME, STATE_ROOT_DIR, STATE_ROOT_ENV};
pub use settings::{
    ExecutionConfig, ExecutionLimits, PauseConfig, RetentionConfig, RetryConfig, Settings,
    StoreConfig, WorkerConfig, WorkflowTypeLimits,
};
