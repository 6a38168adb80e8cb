//! In-memory doubles for the process, probe and GPU seams.
//!
//! Used by this crate's tests and by control-surface tests that need a
//! [`Conductor`](crate::Conductor) without real processes or sockets.

use crate::error::{ConductorError, Result};
use crate::probe::{HealthCheck, ProbeFailure, Probes};
use crate::process::{LaunchSpec, ProcessHandle, ProcessLauncher};
use crate::system::{GpuInfo, GpuMonitor};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A process that lives until told otherwise.
#[derive(Debug)]
pub struct FakeHandle {
    pid: u32,
    exit: Mutex<Option<i64>>,
    ignore_terminate: AtomicBool,
    terminate_calls: AtomicUsize,
    kill_calls: AtomicUsize,
}

impl FakeHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            exit: Mutex::new(None),
            ignore_terminate: AtomicBool::new(false),
            terminate_calls: AtomicUsize::new(0),
            kill_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the process exiting on its own.
    pub fn exit_with(&self, code: i64) {
        lock(&self.exit).get_or_insert(code);
    }

    /// Make graceful termination requests have no effect.
    pub fn ignore_terminate(&self) {
        self.ignore_terminate.store(true, Ordering::SeqCst);
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn kill_calls(&self) -> usize {
        self.kill_calls.load(Ordering::SeqCst)
    }
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        lock(&self.exit).is_none()
    }

    fn exit_code(&self) -> Option<i64> {
        *lock(&self.exit)
    }

    fn terminate(&self) -> Result<()> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_terminate.load(Ordering::SeqCst) {
            self.exit_with(0);
        }
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        self.exit_with(-9);
        Ok(())
    }
}

/// Launcher that hands out [`FakeHandle`]s and records every call.
#[derive(Debug)]
pub struct FakeLauncher {
    next_pid: AtomicU32,
    launches: Mutex<Vec<(LaunchSpec, Arc<FakeHandle>)>>,
    failing: Mutex<HashSet<String>>,
    exit_on_launch: Mutex<HashMap<String, i64>>,
    stubborn: Mutex<HashSet<String>>,
    killed_by_name: Mutex<Vec<String>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            launches: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            exit_on_launch: Mutex::new(HashMap::new()),
            stubborn: Mutex::new(HashSet::new()),
            killed_by_name: Mutex::new(Vec::new()),
        }
    }
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches with this label fail at the OS call.
    pub fn fail_launch(&self, label: &str) {
        lock(&self.failing).insert(label.to_string());
    }

    /// Processes with this label exit with `code` right after launch.
    pub fn exit_on_launch(&self, label: &str, code: i64) {
        lock(&self.exit_on_launch).insert(label.to_string(), code);
    }

    /// Processes with this label ignore graceful termination.
    pub fn ignore_terminate(&self, label: &str) {
        lock(&self.stubborn).insert(label.to_string());
    }

    /// Labels of every successful launch, in order.
    pub fn launched(&self) -> Vec<String> {
        lock(&self.launches)
            .iter()
            .map(|(spec, _)| spec.label.clone())
            .collect()
    }

    pub fn launch_count(&self, label: &str) -> usize {
        lock(&self.launches)
            .iter()
            .filter(|(spec, _)| spec.label == label)
            .count()
    }

    /// The most recent spec and handle launched under `label`.
    pub fn last(&self, label: &str) -> Option<(LaunchSpec, Arc<FakeHandle>)> {
        lock(&self.launches)
            .iter()
            .rev()
            .find(|(spec, _)| spec.label == label)
            .cloned()
    }

    pub fn killed_by_name(&self) -> Vec<String> {
        lock(&self.killed_by_name).clone()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Arc<dyn ProcessHandle>> {
        if lock(&self.failing).contains(&spec.label) {
            return Err(ConductorError::LaunchFailed {
                target: spec.label.clone(),
                message: "simulated spawn failure".to_string(),
            });
        }

        let handle = Arc::new(FakeHandle::new(
            self.next_pid.fetch_add(1, Ordering::SeqCst),
        ));
        if let Some(code) = lock(&self.exit_on_launch).get(&spec.label) {
            handle.exit_with(*code);
        }
        if lock(&self.stubborn).contains(&spec.label) {
            handle.ignore_terminate();
        }

        lock(&self.launches).push((spec.clone(), handle.clone()));
        Ok(handle)
    }

    fn kill_by_name(&self, name: &str) -> usize {
        lock(&self.killed_by_name).push(name.to_string());
        0
    }
}

/// Probes answered from a script instead of the network.
///
/// Ports are not listening and health requests are refused until configured.
#[derive(Debug, Default)]
pub struct ScriptedProbes {
    listening: Mutex<HashSet<u16>>,
    health: Mutex<HashMap<u16, HealthCheck>>,
    broker: AtomicBool,
    health_calls: Mutex<HashMap<u16, usize>>,
    port_calls: Mutex<HashMap<u16, usize>>,
    broker_calls: AtomicUsize,
}

impl ScriptedProbes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listening(&self, port: u16, listening: bool) {
        let mut ports = lock(&self.listening);
        if listening {
            ports.insert(port);
        } else {
            ports.remove(&port);
        }
    }

    pub fn set_health(&self, port: u16, check: HealthCheck) {
        lock(&self.health).insert(port, check);
    }

    /// Port listening and `/health` answering 200.
    pub fn set_serving(&self, port: u16) {
        self.set_listening(port, true);
        self.set_health(port, HealthCheck::responded(200, Some("ok".to_string())));
    }

    /// Port closed and health refused.
    pub fn set_down(&self, port: u16) {
        self.set_listening(port, false);
        self.set_health(port, HealthCheck::failed(ProbeFailure::ConnectionRefused));
    }

    pub fn set_broker(&self, healthy: bool) {
        self.broker.store(healthy, Ordering::SeqCst);
    }

    pub fn health_calls(&self, port: u16) -> usize {
        lock(&self.health_calls).get(&port).copied().unwrap_or(0)
    }

    pub fn port_calls(&self, port: u16) -> usize {
        lock(&self.port_calls).get(&port).copied().unwrap_or(0)
    }

    pub fn broker_calls(&self) -> usize {
        self.broker_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probes for ScriptedProbes {
    async fn port_listening(&self, port: u16) -> bool {
        *lock(&self.port_calls).entry(port).or_default() += 1;
        lock(&self.listening).contains(&port)
    }

    async fn health(&self, port: u16, _timeout: Duration) -> HealthCheck {
        *lock(&self.health_calls).entry(port).or_default() += 1;
        lock(&self.health)
            .get(&port)
            .cloned()
            .unwrap_or_else(|| HealthCheck::failed(ProbeFailure::ConnectionRefused))
    }

    async fn broker(&self) -> bool {
        self.broker_calls.fetch_add(1, Ordering::SeqCst);
        self.broker.load(Ordering::SeqCst)
    }
}

/// A GPU that always reports the same reading.
pub struct FixedGpu(pub GpuInfo);

impl GpuMonitor for FixedGpu {
    fn is_available(&self) -> bool {
        true
    }

    fn gpu_info(&self) -> Option<GpuInfo> {
        Some(self.0.clone())
    }
}

/// Create the interpreter and entry script a service needs to pass the
/// launch prerequisite check.
pub fn install_service_files(interpreter: &Path, script: &Path) -> std::io::Result<()> {
    for path in [interpreter, script] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"")?;
    }
    Ok(())
}
