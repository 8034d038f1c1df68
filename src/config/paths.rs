use crate::config::ConfigError;
use std::path::PathBuf;

pub const STATE_ROOT_DIR: &str = ".tether";
pub const STATE_ROOT_ENV: &str = "TETHER_HOME";
pub const SETTINGS_FILE_NAME: &str = "config.yaml";

/// `$TETHER_HOME` when set, otherwise `$HOME/.tether`.
pub fn default_state_root_path() -> Result<PathBuf, ConfigError> {
    if let Some(root) = std::env::var_os(STATE_ROOT_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(STATE_ROOT_DIR))
}
