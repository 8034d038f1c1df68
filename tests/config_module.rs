use std::fs;
use std::time::Duration;
use tempfile::tempdir;
use tether::config::{
    load_settings_from_state_root, save_settings, ConfigError, Settings, SETTINGS_FILE_NAME,
};

#[test]
fn config_module_loads_yaml_overrides_from_state_root() {
    let temp = tempdir().expect("tempdir");
    fs::write(
        temp.path().join(SETTINGS_FILE_NAME),
        r#"
store:
  db_file: state/engine.db
retry:
  base_delay_seconds: 5
  max_delay_seconds: 60
  max_retries: 2
pause:
  default_timeout_seconds: 120
workers:
  count: 4
workflows:
  invoice_approval:
    max_retries: 6
    step_timeout_seconds: 15
"#,
    )
    .expect("write config");

    let settings = load_settings_from_state_root(temp.path()).expect("load");
    assert_eq!(settings.retry.base_delay_seconds, 5);
    assert_eq!(settings.pause.default_timeout_seconds, 120);
    assert_eq!(settings.workers.count, 4);
    assert_eq!(settings.workers.poll_interval_ms, 500);
    assert_eq!(
        settings.db_path(temp.path()),
        temp.path().join("state/engine.db")
    );

    let limits = settings.resolve_execution_limits("invoice_approval");
    assert_eq!(limits.max_retries, 6);
    assert_eq!(limits.step_timeout, Duration::from_secs(15));
    assert_eq!(settings.resolve_execution_limits("other").max_retries, 2);
}

#[test]
fn config_module_rejects_invalid_values() {
    let temp = tempdir().expect("tempdir");
    fs::write(
        temp.path().join(SETTINGS_FILE_NAME),
        "execution:\n  step_timeout_seconds: 0\n",
    )
    .expect("write config");

    let err = load_settings_from_state_root(temp.path()).expect_err("zero timeout");
    assert!(matches!(err, ConfigError::Settings(_)));
    assert!(err.to_string().contains("step_timeout_seconds"));
}

#[test]
fn config_module_save_refuses_invalid_settings() {
    let temp = tempdir().expect("tempdir");
    let mut settings = Settings::default();
    settings.workers.count = 0;

    assert!(save_settings(temp.path(), &settings).is_err());
    assert!(!temp.path().join(SETTINGS_FILE_NAME).exists());
}

#[test]
fn config_module_saved_defaults_round_trip_through_yaml() {
    let temp = tempdir().expect("tempdir");
    let path = save_settings(temp.path(), &Settings::default()).expect("save");
    let raw = fs::read_to_string(path).expect("read");
    assert!(raw.contains("max_retries: 3"));
    assert_eq!(
        load_settings_from_state_root(temp.path()).expect("load"),
        Settings::default()
    );
}
