//! Platform-specific process management.
//!
//! Graceful termination requests, name-based backstop kills, and exit-code
//! classification.

use crate::error::{ConductorError, Result};
use std::ffi::OsStr;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

const WINDOWS_ACCESS_VIOLATION: u32 = 0xC000_0005;
const UNIX_SEGV_EXIT_CODE: i64 = 128 + 11;

/// Whether an exit code denotes a memory access violation on any platform.
///
/// Both encodings are recognized so codes relayed from another host (or
/// reported unsigned, as `3221225477`) classify the same way.
pub fn is_access_violation(code: i64) -> bool {
    code == UNIX_SEGV_EXIT_CODE || code as i32 as u32 == WINDOWS_ACCESS_VIOLATION
}

/// Human-readable exit code for log lines.
pub fn describe_exit(code: Option<i64>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    }
}

/// Ask a process to exit gracefully.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends SIGTERM to the process group led by `pid`
///   (children are launched as group leaders), falling back to the pid alone
///   when no such group exists
/// - **Windows**: Runs `taskkill /PID {pid} /T` (no `/F`), which posts a close
///   request to the process tree
///
/// A process that no longer exists counts as success.
pub fn request_termination(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::Pid;

        debug!("Sending SIGTERM to process group {}", pid);
        let target = Pid::from_raw(pid as i32);
        let sent = match killpg(target, Signal::SIGTERM) {
            Err(Errno::ESRCH) => kill(target, Signal::SIGTERM),
            other => other,
        };
        match sent {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ConductorError::Other(format!(
                "Failed to send SIGTERM to {}: {}",
                pid, e
            ))),
        }
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        debug!("Requesting close of process {} with taskkill", pid);
        let output = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T"])
            .output()
            .map_err(|e| ConductorError::Other(format!("Failed to run taskkill: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // "not found" errors are OK - process already dead
        if stderr.contains("not found") || stderr.contains("not running") {
            Ok(())
        } else {
            Err(ConductorError::Other(format!(
                "taskkill failed for {}: {}",
                pid,
                stderr.trim()
            )))
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(ConductorError::Other(format!(
            "Graceful termination not implemented for this platform (pid {})",
            pid
        )))
    }
}

/// Force-kill the process group led by `pid`.
///
/// Only meaningful on Unix; elsewhere the handle's own kill covers it.
/// A group that no longer exists counts as success.
pub fn kill_process_group(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(ConductorError::Other(format!(
                "Failed to kill process group {}: {}",
                pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(())
    }
}

/// Force-kill every process whose executable name matches `name`.
///
/// The platform executable suffix is ignored, so `redis-server` also matches
/// `redis-server.exe`. Returns the number of processes signalled.
pub fn kill_processes_by_name(name: &str) -> usize {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

    let wanted = name.trim_end_matches(".exe").to_lowercase();
    let mut killed = 0;

    for (pid, process) in system.processes() {
        if !name_matches(process.name(), &wanted) {
            continue;
        }
        if process.kill() {
            debug!("Killed process {} ({})", pid, name);
            killed += 1;
        } else {
            warn!("Failed to kill process {} ({})", pid, name);
        }
    }

    killed
}

fn name_matches(process_name: &OsStr, wanted: &str) -> bool {
    let process_name = process_name.to_string_lossy().to_lowercase();
    process_name.trim_end_matches(".exe") == wanted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_violation_codes() {
        assert!(is_access_violation(3_221_225_477));
        assert!(is_access_violation(-1_073_741_819));
        assert!(is_access_violation(139));
        assert!(!is_access_violation(0));
        assert!(!is_access_violation(1));
    }

    #[test]
    fn test_describe_exit() {
        assert_eq!(describe_exit(Some(1)), "1");
        assert_eq!(describe_exit(None), "unknown");
    }

    #[test]
    fn test_name_matches_ignores_suffix_and_case() {
        assert!(name_matches(OsStr::new("redis-server.exe"), "redis-server"));
        assert!(name_matches(OsStr::new("Redis-Server"), "redis-server"));
        assert!(!name_matches(OsStr::new("redis-cli"), "redis-server"));
    }

    #[test]
    fn test_kill_nonexistent_name() {
        assert_eq!(kill_processes_by_name("conductor-no-such-process-xyz"), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_nonexistent() {
        // A very high PID should not exist
        assert!(request_termination(4_194_400).is_ok());
        assert!(kill_process_group(4_194_400).is_ok());
    }

    #[cfg(target_os = "linux")]
    fn gone_or_zombie(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_termination_reaches_grandchildren() {
        use std::io::{BufRead, BufReader};
        use std::os::unix::process::CommandExt;
        use std::process::{Command, Stdio};
        use std::time::{Duration, Instant};

        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & echo $!; wait"])
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let mut line = String::new();
        BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        let grandchild: u32 = line.trim().parse().unwrap();

        request_termination(child.id()).unwrap();
        child.wait().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !gone_or_zombie(grandchild) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let survived = !gone_or_zombie(grandchild);
        if survived {
            let _ = kill_process_group(grandchild);
        }
        assert!(!survived, "grandchild {} outlived SIGTERM", grandchild);
    }
}
