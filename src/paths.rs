use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "SESSION_SHELL_DATA_DIR";
const OVERRIDE_CONFIG_FILE: &str = "session-shell.config.json";

#[derive(Debug, Deserialize)]
struct DataDirOverride {
    #[serde(rename = "userDataDir", default)]
    user_data_dir: Option<String>,
}

/// Resolves the data directory: environment override first, then a config
/// file next to the executable, then the per-user default.
pub fn default_data_dir() -> PathBuf {
    let path = std::env::var_os(DATA_DIR_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
                .and_then(|dir| read_data_dir_override(&dir))
        })
        .unwrap_or_else(platform_data_dir);
    let _ = std::fs::create_dir_all(&path);
    path
}

pub fn read_data_dir_override(install_dir: &Path) -> Option<PathBuf> {
    let text = std::fs::read_to_string(install_dir.join(OVERRIDE_CONFIG_FILE)).ok()?;
    let parsed: DataDirOverride = serde_json::from_str(&text).ok()?;
    parsed
        .user_data_dir
        .map(|dir| dir.trim().to_string())
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
}

fn platform_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if cfg!(target_os = "macos") => PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("session-shell"),
        Some(home) => PathBuf::from(home).join(".local").join("share").join("session-shell"),
        None => PathBuf::from("."),
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.toml")
}

pub fn profiles_path(data_dir: &Path) -> PathBuf {
    data_dir.join("profiles.json")
}

pub fn downloads_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("Downloads")
}

pub fn partitions_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("Partitions")
}
