use crate::app::command_support::{ensure_state_root, load_settings, now_secs, open_engine};
use crate::config::save_settings;
use crate::runtime::append_runtime_log;

pub fn cmd_init(args: &[String]) -> Result<String, String> {
    if !args.is_empty() {
        return Err("usage: init".to_string());
    }
    let paths = ensure_state_root()?;
    let settings_file = paths.settings_file();
    let created_config = !settings_file.is_file();
    if created_config {
        let settings = load_settings(&paths)?;
        save_settings(&paths.root, &settings).map_err(|e| e.to_string())?;
    }
    let (settings, _engine) = open_engine(&paths)?;
    append_runtime_log(
        &paths,
        "info",
        "state_root.initialized",
        &paths.root.display().to_string(),
    );
    Ok(format!(
        "state root initialized\nstate_root={}\nconfig={}\nconfig_created={}\ndatabase={}",
        paths.root.display(),
        settings_file.display(),
        created_config,
        settings.db_path(&paths.root).display()
    ))
}

pub fn cmd_sweep(args: &[String]) -> Result<String, String> {
    if !args.is_empty() {
        return Err("usage: sweep".to_string());
    }
    let paths = ensure_state_root()?;
    let (_, engine) = open_engine(&paths)?;
    let now = now_secs();
    let timeouts = engine.sweep_timeouts(now).map_err(|e| e.to_string())?;
    let retention = engine.sweep_retention(now).map_err(|e| e.to_string())?;
    append_runtime_log(&paths, "info", "sweep.timeouts", &timeouts.summary());
    append_runtime_log(&paths, "info", "sweep.retention", &retention.summary());

    let mut lines = vec![
        "sweep complete".to_string(),
        format!("timeouts {}", timeouts.summary()),
        format!("retention {}", retention.summary()),
    ];
    lines.extend(timeouts.errors.iter().map(|e| format!("timeout_error={e}")));
    lines.extend(retention.errors.iter().map(|e| format!("retention_error={e}")));
    Ok(lines.join("\n"))
}
