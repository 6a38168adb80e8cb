//! Process launching.

use super::handle::{ChildHandle, ProcessHandle};
use crate::error::{ConductorError, Result};
use crate::platform;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, error, info};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Everything needed to spawn one process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Name used in log lines and errors.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Complete child environment. `None` inherits ours unchanged.
    pub env: Option<BTreeMap<String, String>>,
    /// Combined stdout/stderr destination, truncated on launch. `None`
    /// discards output.
    pub log_file: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let working_dir = program
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            label: label.into(),
            program,
            args: Vec::new(),
            working_dir,
            env: None,
            log_file: None,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Launches processes and performs name-based cleanup.
///
/// The supervisor only talks to the OS through this trait.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<Arc<dyn ProcessHandle>>;

    /// Force-kill every process with this executable name. Returns how many
    /// were killed.
    fn kill_by_name(&self, name: &str) -> usize;
}

/// Launches real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl OsLauncher {
    pub fn new() -> Self {
        Self
    }

    fn stdio(spec: &LaunchSpec) -> Result<(Stdio, Stdio)> {
        let Some(log_file) = &spec.log_file else {
            return Ok((Stdio::null(), Stdio::null()));
        };

        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent).map_err(|e| ConductorError::io_with_path(e, parent))?;
        }
        let file = fs::File::create(log_file).map_err(|e| ConductorError::Io {
            message: "create log file".to_string(),
            path: Some(log_file.clone()),
            source: Some(e),
        })?;
        let stdout_file = file.try_clone().map_err(|e| ConductorError::Io {
            message: "clone log file handle".to_string(),
            path: Some(log_file.clone()),
            source: Some(e),
        })?;
        Ok((Stdio::from(stdout_file), Stdio::from(file)))
    }
}

impl ProcessLauncher for OsLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Arc<dyn ProcessHandle>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.current_dir(&spec.working_dir);

        if let Some(env) = &spec.env {
            cmd.env_clear();
            cmd.envs(env);
        }

        let (stdout, stderr) = Self::stdio(spec)?;
        cmd.stdin(Stdio::null());
        cmd.stdout(stdout);
        cmd.stderr(stderr);

        // Own process group so a ctrl-c at our terminal is not delivered to
        // the children directly; the stop sequence decides how they exit.
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        info!(
            "Launching {} ({}) in {}",
            spec.label,
            spec.program.display(),
            spec.working_dir.display()
        );

        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn {}: {}", spec.label, e);
            ConductorError::LaunchFailed {
                target: spec.label.clone(),
                message: e.to_string(),
            }
        })?;

        debug!("Launched {} with PID {}", spec.label, child.id());
        Ok(Arc::new(ChildHandle::new(child)))
    }

    fn kill_by_name(&self, name: &str) -> usize {
        platform::kill_processes_by_name(name)
    }
}
