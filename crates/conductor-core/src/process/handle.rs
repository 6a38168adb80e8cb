//! Capability interface over a launched OS process.

use crate::error::{ConductorError, Result};
use crate::platform;
use std::fmt;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A live reference to one launched process.
///
/// Implementations must be cheap to query; the health monitor calls
/// `is_alive` for every tracked service on every cycle.
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    fn pid(&self) -> u32;

    /// Whether the process is still running. Reaps it if it has exited.
    fn is_alive(&self) -> bool;

    /// Exit code once the process has exited, `None` while running.
    fn exit_code(&self) -> Option<i64>;

    /// Ask the process to exit.
    fn terminate(&self) -> Result<()>;

    /// Force the process to exit.
    fn kill(&self) -> Result<()>;
}

/// [`ProcessHandle`] over a `std::process::Child` spawned by this process.
pub struct ChildHandle {
    pid: u32,
    child: Mutex<Child>,
    exit: Mutex<Option<i64>>,
}

impl ChildHandle {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
            exit: Mutex::new(None),
        }
    }

    /// Poll the child once, caching the exit code the first time it is seen.
    fn poll(&self) -> Option<i64> {
        let mut exit = self.exit.lock().unwrap_or_else(|e| e.into_inner());
        if exit.is_some() {
            return *exit;
        }

        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = exit_status_code(status);
                debug!("Process {} exited with {}", self.pid, code);
                *exit = Some(code);
                *exit
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Failed to poll process {}: {}", self.pid, e);
                None
            }
        }
    }
}

impl fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildHandle").field("pid", &self.pid).finish()
    }
}

impl ProcessHandle for ChildHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.poll().is_none()
    }

    fn exit_code(&self) -> Option<i64> {
        self.poll()
    }

    fn terminate(&self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        platform::request_termination(self.pid)
    }

    fn kill(&self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        if let Err(e) = platform::kill_process_group(self.pid) {
            debug!("{}", e);
        }
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        child.kill().map_err(|e| ConductorError::Other(format!(
            "Failed to kill process {}: {}",
            self.pid, e
        )))
    }
}

/// Normalize an exit status to a single integer.
///
/// Unix signal deaths become `128 + signal`, the shell convention.
fn exit_status_code(status: ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return i64::from(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + i64::from(signal);
        }
    }

    -1
}

/// Poll until the process exits or `timeout` elapses.
///
/// Returns `true` if the process exited.
pub async fn wait_for_exit(handle: &dyn ProcessHandle, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !handle.is_alive() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll.max(Duration::from_millis(1))).await;
    }
}

/// Outcome of [`stop_handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after the graceful request.
    Terminated,
    /// Needed a force kill.
    Killed,
    /// Still alive after the force kill.
    Unresponsive,
}

/// Graceful-then-forced stop of one process with bounded waits.
pub async fn stop_handle(
    handle: &Arc<dyn ProcessHandle>,
    terminate_wait: Duration,
    kill_wait: Duration,
    poll: Duration,
) -> StopOutcome {
    if let Err(e) = handle.terminate() {
        debug!("Terminate request for {} failed: {}", handle.pid(), e);
    }
    if wait_for_exit(handle.as_ref(), terminate_wait, poll).await {
        return StopOutcome::Terminated;
    }

    if let Err(e) = handle.kill() {
        debug!("Kill of {} failed: {}", handle.pid(), e);
    }
    if wait_for_exit(handle.as_ref(), kill_wait, poll).await {
        StopOutcome::Killed
    } else {
        StopOutcome::Unresponsive
    }
}
