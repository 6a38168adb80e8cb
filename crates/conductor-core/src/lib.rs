//! Conductor Core - supervisor and adaptive health monitor for a fixed set of
//! local backend services.
//!
//! The managed set is one broker (redis) plus three Python workers. The crate
//! launches and stops them, probes them on an interval that adapts to how
//! healthy the set is, and derives display states for a control surface. It
//! has no UI or transport of its own; `conductor-rpc` wraps it in JSON-RPC.
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor_core::{Conductor, ConductorConfig};
//!
//! #[tokio::main]
//! async fn main() -> conductor_core::Result<()> {
//!     let conductor = Conductor::new(ConductorConfig::default())?;
//!     conductor.start_monitor();
//!
//!     if let Some(start) = conductor.request_start() {
//!         start.await.ok();
//!     }
//!     let report = conductor.query_display_state().await;
//!     println!("{}", report.summary);
//!
//!     conductor.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod monitor;
pub mod platform;
pub mod probe;
pub mod process;
pub mod retry;
pub mod service;
pub mod status;
pub mod supervisor;
pub mod system;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cancel::CancellationToken;
pub use config::{ConductorConfig, Timings};
pub use error::{ConductorError, Result};
pub use events::{Event, EventBus, LogLevel, LogLine, OperationKind, OperationOutcome};
pub use monitor::{ConfirmedRegistry, HealthMonitor, HealthSnapshot};
pub use probe::{HealthCheck, NetworkProbes, ProbeFailure, Probes};
pub use process::{OsLauncher, ProcessHandle, ProcessLauncher, ProcessRegistry};
pub use service::{BrokerDescriptor, ServiceDescriptor, ServiceId, ServiceMap};
pub use status::{DisplayReport, DisplayState};
pub use supervisor::{Lifecycle, Supervisor};
pub use system::{GpuMonitor, SystemStats};

use config::SupervisorConfig;
use std::sync::{Arc, Mutex};
use system::ResourceTracker;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Builder for a [`Conductor`] with substituted process or probe seams.
///
/// # Example
///
/// ```rust,ignore
/// let conductor = Conductor::builder(config)
///     .with_launcher(Arc::new(FakeLauncher::new()))
///     .with_probes(Arc::new(ScriptedProbes::new()))
///     .build()?;
/// ```
pub struct ConductorBuilder {
    config: ConductorConfig,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    probes: Option<Arc<dyn Probes>>,
    gpu: Option<Arc<dyn GpuMonitor>>,
}

impl ConductorBuilder {
    pub fn new(config: ConductorConfig) -> Self {
        Self {
            config,
            launcher: None,
            probes: None,
            gpu: None,
        }
    }

    /// Replace the OS process launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Replace the network probes.
    pub fn with_probes(mut self, probes: Arc<dyn Probes>) -> Self {
        self.probes = Some(probes);
        self
    }

    /// Replace GPU detection for system stats.
    pub fn with_gpu_monitor(mut self, gpu: Arc<dyn GpuMonitor>) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn build(self) -> Result<Conductor> {
        let config = self.config;
        let descriptors = Arc::new(config.descriptors());

        let probes: Arc<dyn Probes> = match self.probes {
            Some(probes) => probes,
            None => Arc::new(NetworkProbes::new(
                &config.broker_descriptor(),
                &config.timings,
            )?),
        };
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(OsLauncher::new()));

        let registry = Arc::new(ProcessRegistry::new());
        let confirmed = Arc::new(ConfirmedRegistry::new(config.timings.confirmation_ttl));
        let bus = EventBus::new();
        let supervisor = Supervisor::new(
            &config,
            descriptors.clone(),
            registry.clone(),
            launcher,
            probes.clone(),
            bus.clone(),
        );

        Ok(Conductor {
            config,
            descriptors,
            registry,
            probes,
            confirmed,
            bus,
            supervisor,
            monitor: Mutex::new(None),
            resources: Arc::new(ResourceTracker::new(self.gpu)),
        })
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Entry point for the control surface.
///
/// Owns the process registry, the confirmed-healthy registry and the event
/// bus, and wires them into one [`Supervisor`] and one [`HealthMonitor`].
pub struct Conductor {
    config: ConductorConfig,
    descriptors: Arc<ServiceMap<ServiceDescriptor>>,
    registry: Arc<ProcessRegistry>,
    probes: Arc<dyn Probes>,
    confirmed: Arc<ConfirmedRegistry>,
    bus: EventBus,
    supervisor: Supervisor,
    monitor: Mutex<Option<MonitorTask>>,
    resources: Arc<ResourceTracker>,
}

impl Conductor {
    /// Build with the real launcher and network probes.
    pub fn new(config: ConductorConfig) -> Result<Self> {
        ConductorBuilder::new(config).build()
    }

    pub fn builder(config: ConductorConfig) -> ConductorBuilder {
        ConductorBuilder::new(config)
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &ServiceMap<ServiceDescriptor> {
        &self.descriptors
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Spawn the health monitor. Returns `false` if it is already running.
    pub fn start_monitor(&self) -> bool {
        let mut slot = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            self.descriptors.clone(),
            self.registry.clone(),
            self.probes.clone(),
            self.confirmed.clone(),
            self.bus.clone(),
            self.config.timings.clone(),
        );
        let handle = monitor.spawn(cancel.clone());
        *slot = Some(MonitorTask { cancel, handle });
        true
    }

    /// Stop the health monitor and wait for it, bounded.
    ///
    /// Returns `false` if it did not exit in time.
    pub async fn stop_monitor(&self) -> bool {
        let task = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(MonitorTask { cancel, handle }) = task else {
            return true;
        };

        cancel.cancel();
        match tokio::time::timeout(SupervisorConfig::SHUTDOWN_MONITOR_WAIT, handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "Health monitor did not stop within {:?}",
                    SupervisorConfig::SHUTDOWN_MONITOR_WAIT
                );
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<HealthSnapshot>> {
        self.bus.watch_snapshot()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.bus.latest_snapshot()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.supervisor.lifecycle()
    }

    pub fn in_flight(&self) -> Option<OperationKind> {
        self.supervisor.in_flight()
    }

    pub fn is_confirmed(&self, id: ServiceId) -> bool {
        self.confirmed.is_fresh(id)
    }

    /// Non-blocking. `None` if an operation is in flight or the set is
    /// already running.
    pub fn request_start(&self) -> Option<JoinHandle<()>> {
        self.supervisor.request_start()
    }

    /// Non-blocking. `None` if an operation is in flight or nothing is
    /// running.
    pub fn request_stop(&self) -> Option<JoinHandle<()>> {
        self.supervisor.request_stop()
    }

    pub async fn request_restart(&self, id: ServiceId) -> Result<()> {
        self.supervisor.restart(id).await
    }

    pub async fn request_stop_one(&self, id: ServiceId) -> Result<()> {
        self.supervisor.stop_one(id).await
    }

    /// Per-service, broker and overall display states.
    pub async fn query_display_state(&self) -> DisplayReport {
        let lifecycle = self.supervisor.lifecycle();
        let in_flight = self.supervisor.in_flight();
        let snapshot = self.bus.latest_snapshot();
        let broker = self.supervisor.broker_descriptor();

        let observations = status::observe(
            &self.registry,
            &snapshot,
            self.probes.as_ref(),
            &self.descriptors,
            broker.port,
        )
        .await;

        status::build_report(
            lifecycle,
            in_flight,
            &snapshot,
            &observations,
            &self.descriptors,
            &broker.display_name,
        )
    }

    /// CPU, RAM and first-GPU usage of the host.
    pub async fn system_stats(&self) -> SystemStats {
        let resources = self.resources.clone();
        match tokio::task::spawn_blocking(move || resources.sample()).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("System stats sampling failed: {}", e);
                SystemStats::unavailable()
            }
        }
    }

    /// Application exit: finish or stop whatever is running, then stop the
    /// monitor.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.supervisor.shutdown().await;
        self.stop_monitor().await;
    }
}
