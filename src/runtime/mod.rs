pub mod logging;
pub mod state_paths;
pub mod worker;

pub use crate::shared::errors::RuntimeError;
pub use logging::append_runtime_log;
pub use state_paths::{bootstrap_state_root, StatePaths};
pub use worker::{spawn_workers, WorkerPool};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bootstrap_creates_required_directories() {
        let dir = tempdir().expect("temp dir");
        let paths = StatePaths::new(dir.path().join("state"));
        bootstrap_state_root(&paths).expect("bootstrap succeeds");

        for required in paths.required_directories() {
            assert!(
                required.is_dir(),
                "missing directory: {}",
                required.display()
            );
        }
    }

    #[test]
    fn runtime_log_appends_json_lines() {
        let dir = tempdir().expect("temp dir");
        let paths = StatePaths::new(dir.path());
        append_runtime_log(&paths, "info", "worker.started", "worker-0");
        append_runtime_log(&paths, "warn", "workflow.tick.failed", "boom");

        let raw = std::fs::read_to_string(paths.runtime_log_path()).expect("read log");
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["event"], "worker.started");
        assert_eq!(first["level"], "info");
        assert_eq!(first["message"], "worker-0");
    }
}
