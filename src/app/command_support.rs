use crate::config::{default_state_root_path, load_settings_from_state_root, Settings};
use crate::engine::{WorkflowEngine, WorkflowRegistry};
use crate::runtime::{bootstrap_state_root, StatePaths};
use chrono::{DateTime, SecondsFormat};

pub use crate::shared::time::now_secs;

pub fn state_paths() -> Result<StatePaths, String> {
    default_state_root_path()
        .map(StatePaths::new)
        .map_err(|e| e.to_string())
}

pub fn ensure_state_root() -> Result<StatePaths, String> {
    let paths = state_paths()?;
    bootstrap_state_root(&paths).map_err(|e| e.to_string())?;
    Ok(paths)
}

pub fn load_settings(paths: &StatePaths) -> Result<Settings, String> {
    load_settings_from_state_root(&paths.root).map_err(|e| e.to_string())
}

/// Operator commands never run steps, so the engine carries no registered workflow types.
pub fn open_engine(paths: &StatePaths) -> Result<(Settings, WorkflowEngine), String> {
    let settings = load_settings(paths)?;
    let engine = WorkflowEngine::open(&paths.root, settings.clone(), WorkflowRegistry::new())
        .map_err(|e| e.to_string())?;
    Ok((settings, engine))
}

pub fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| secs.to_string())
}

pub fn format_optional_timestamp(secs: Option<i64>) -> String {
    secs.map(format_timestamp)
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_as_utc_rfc3339() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14T22:13:20Z");
        assert_eq!(format_optional_timestamp(None), "none");
    }
}
