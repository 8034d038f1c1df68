use super::{ConfigError, Settings, SETTINGS_FILE_NAME};
use crate::shared::fs_atomic::atomic_write_file;
use std::fs;
use std::path::{Path, PathBuf};

/// Loads `<state_root>/config.yaml`; a missing file yields validated defaults.
pub fn load_settings_from_state_root(state_root: &Path) -> Result<Settings, ConfigError> {
    let path = state_root.join(SETTINGS_FILE_NAME);
    let settings = if path.is_file() {
        Settings::from_path(&path)?
    } else {
        Settings::default()
    };
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(state_root: &Path, settings: &Settings) -> Result<PathBuf, ConfigError> {
    settings.validate()?;
    fs::create_dir_all(state_root).map_err(|source| ConfigError::CreateDir {
        path: state_root.display().to_string(),
        source,
    })?;
    let path = state_root.join(SETTINGS_FILE_NAME);
    let body = serde_yaml::to_string(settings).map_err(|source| ConfigError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(&path, body.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}
