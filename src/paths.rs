use std::path::PathBuf;

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("manage")
}

/// Per-user config file: `~/.config/manage/manage.toml`
pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("manage").join(crate::config::CONFIG_FILE))
}

/// Application log: `~/.local/state/manage/manage.log`
pub fn app_log_file() -> PathBuf {
    state_dir().join("manage.log")
}

/// Per-run action logs: `~/.local/state/manage/runs/`
pub fn run_logs_dir() -> PathBuf {
    state_dir().join("runs")
}

/// Persisted UI preferences: `~/.local/state/manage/last-machine`
pub fn prefs_file() -> PathBuf {
    state_dir().join("last-machine")
}
