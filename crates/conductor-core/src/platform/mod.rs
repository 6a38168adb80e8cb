//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than being
//! scattered through the supervisor.
//!
//! - `paths` - Interpreter, executable, and data directory locations
//! - `process` - Signals, backstop kills, and exit-code classification

pub mod paths;
pub mod process;

pub use paths::{default_base_dir, executable_name, venv_python};
pub use process::{
    describe_exit, is_access_violation, kill_process_group, kill_processes_by_name,
    request_termination,
};

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}
