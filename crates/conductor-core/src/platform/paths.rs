//! Platform-specific path utilities.

use crate::config::AppConfig;
use std::path::{Path, PathBuf};

/// Get the path to the Python interpreter within a service's `env` venv.
///
/// # Platform Behavior
/// - **Linux/macOS**: `{base}/env/bin/python`
/// - **Windows**: `{base}/env/Scripts/python.exe`
pub fn venv_python(base: &Path) -> PathBuf {
    #[cfg(unix)]
    {
        base.join("env").join("bin").join("python")
    }
    #[cfg(windows)]
    {
        base.join("env").join("Scripts").join("python.exe")
    }
}

/// Append the platform executable suffix to a program name.
pub fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Default program directory: `{data_dir}/conductor`, or the working
/// directory when no data directory is known.
pub fn default_base_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(AppConfig::APP_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}
