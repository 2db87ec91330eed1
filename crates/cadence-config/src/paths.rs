//! Where the thread config lives.
//!
//! The default file is `thread.toml` in the platform config directory
//! (`~/.config/cadence/` on Linux, `~/Library/Application Support/cadence/`
//! on macOS, `%APPDATA%\cadence\` on Windows). Setting [`CONFIG_ENV`] points
//! the server at another file.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "CADENCE_CONFIG";

const DIR_NAME: &str = "cadence";
const FILE_NAME: &str = "thread.toml";

/// Platform config directory for cadence, or `./cadence` when the platform
/// has none.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DIR_NAME)
}

/// Config file to load: [`CONFIG_ENV`] when set and non-empty, else
/// `thread.toml` in [`user_config_dir`].
pub fn default_config_path() -> PathBuf {
    resolve_config_path(std::env::var_os(CONFIG_ENV))
}

fn resolve_config_path(explicit: Option<OsString>) -> PathBuf {
    match explicit {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => user_config_dir().join(FILE_NAME),
    }
}

/// Create [`user_config_dir`] if needed and return it.
pub fn ensure_user_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = user_config_dir();
    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::create_dir(&dir, e))?;
    Ok(dir)
}
