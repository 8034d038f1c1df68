use super::StatePaths;
use crate::shared::logging::append_event_line;
use crate::shared::time::now_secs;
use serde_json::Value;

/// Best effort; a failed write is dropped.
pub fn append_runtime_log(paths: &StatePaths, level: &str, event: &str, message: &str) {
    let _ = append_event_line(
        &paths.runtime_log_path(),
        now_secs(),
        event,
        &[
            ("level", Value::from(level)),
            ("message", Value::from(message)),
        ],
    );
}
