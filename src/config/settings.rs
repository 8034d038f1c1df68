use super::ConfigError;
use crate::shared::ids::validate_identifier_value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pause: PauseConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowTypeLimits>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_seconds")]
    pub base_delay_seconds: u64,
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: default_base_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PauseConfig {
    #[serde(default = "default_pause_timeout_seconds")]
    pub default_timeout_seconds: u64,
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_pause_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_step_timeout_seconds")]
    pub step_timeout_seconds: u64,
    #[serde(default = "default_conflict_retry_limit")]
    pub conflict_retry_limit: u32,
    #[serde(default = "default_max_steps_per_tick")]
    pub max_steps_per_tick: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_seconds: default_step_timeout_seconds(),
            conflict_retry_limit: default_conflict_retry_limit(),
            max_steps_per_tick: default_max_steps_per_tick(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_archive_after_seconds")]
    pub archive_after_seconds: u64,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            archive_after_seconds: default_archive_after_seconds(),
            archive_dir: default_archive_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkflowTypeLimits {
    pub max_retries: Option<u32>,
    pub step_timeout_seconds: Option<u64>,
}

fn default_db_file() -> PathBuf {
    PathBuf::from("workflows.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_base_delay_seconds() -> u64 {
    2
}

fn default_max_delay_seconds() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_pause_timeout_seconds() -> u64 {
    3_600
}

fn default_step_timeout_seconds() -> u64 {
    300
}

fn default_conflict_retry_limit() -> u32 {
    8
}

fn default_max_steps_per_tick() -> u32 {
    64
}

fn default_archive_after_seconds() -> u64 {
    7 * 24 * 3_600
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

fn default_worker_count() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_sweep_interval_seconds() -> u64 {
    30
}

/// Retry and timeout limits in force for one workflow type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub max_retries: u32,
    pub step_timeout: Duration,
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.db_file.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "`store.db_file` must be non-empty".to_string(),
            ));
        }
        if self.retry.base_delay_seconds == 0 {
            return Err(ConfigError::Settings(
                "`retry.base_delay_seconds` must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_delay_seconds < self.retry.base_delay_seconds {
            return Err(ConfigError::Settings(
                "`retry.max_delay_seconds` must be at least `retry.base_delay_seconds`"
                    .to_string(),
            ));
        }
        if self.pause.default_timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`pause.default_timeout_seconds` must be greater than 0".to_string(),
            ));
        }
        if self.execution.step_timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`execution.step_timeout_seconds` must be greater than 0".to_string(),
            ));
        }
        if self.execution.conflict_retry_limit == 0 {
            return Err(ConfigError::Settings(
                "`execution.conflict_retry_limit` must be greater than 0".to_string(),
            ));
        }
        if self.execution.max_steps_per_tick == 0 {
            return Err(ConfigError::Settings(
                "`execution.max_steps_per_tick` must be greater than 0".to_string(),
            ));
        }
        if self.workers.count == 0 {
            return Err(ConfigError::Settings(
                "`workers.count` must be greater than 0".to_string(),
            ));
        }
        if self.workers.poll_interval_ms == 0 {
            return Err(ConfigError::Settings(
                "`workers.poll_interval_ms` must be greater than 0".to_string(),
            ));
        }
        for (workflow_type, limits) in &self.workflows {
            validate_identifier_value("workflow type", workflow_type)
                .map_err(|err| ConfigError::Settings(format!("`workflows.{workflow_type}`: {err}")))?;
            if limits.step_timeout_seconds == Some(0) {
                return Err(ConfigError::Settings(format!(
                    "`workflows.{workflow_type}.step_timeout_seconds` must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    pub fn db_path(&self, state_root: &Path) -> PathBuf {
        resolve_under(state_root, &self.store.db_file)
    }

    pub fn archive_dir(&self, state_root: &Path) -> PathBuf {
        resolve_under(state_root, &self.retention.archive_dir)
    }

    /// Per-type limits win over the global retry and execution sections.
    pub fn resolve_execution_limits(&self, workflow_type: &str) -> ExecutionLimits {
        let overrides = self.workflows.get(workflow_type);
        ExecutionLimits {
            max_retries: overrides
                .and_then(|v| v.max_retries)
                .unwrap_or(self.retry.max_retries),
            step_timeout: Duration::from_secs(
                overrides
                    .and_then(|v| v.step_timeout_seconds)
                    .unwrap_or(self.execution.step_timeout_seconds),
            ),
        }
    }
}

fn resolve_under(state_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        state_root.join(path)
    }
}
