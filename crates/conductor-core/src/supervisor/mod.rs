//! Start/stop/restart coordination.
//!
//! Every operation holds one shared single-flight slot for its whole
//! duration, so a start can never overlap a stop or another start. Start-all
//! and stop-all run on a spawned task and report through the event bus;
//! restart and stop-one run inline on the caller's task.

mod flight;
mod lifecycle;
mod worker;

pub use lifecycle::{format_uptime, Lifecycle};

use crate::config::{ConductorConfig, SupervisorConfig, Timings};
use crate::error::{ConductorError, Result};
use crate::events::{EventBus, OperationKind};
use crate::probe::Probes;
use crate::process::{DiagnosticSink, ProcessLauncher, ProcessRegistry};
use crate::service::{BrokerDescriptor, ServiceDescriptor, ServiceId, ServiceMap};
use flight::FlightSlot;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Inner {
    descriptors: Arc<ServiceMap<ServiceDescriptor>>,
    broker: BrokerDescriptor,
    registry: Arc<ProcessRegistry>,
    launcher: Arc<dyn ProcessLauncher>,
    probes: Arc<dyn Probes>,
    sink: DiagnosticSink,
    env_file: PathBuf,
    timings: Timings,
    bus: EventBus,
    lifecycle: RwLock<Lifecycle>,
    flight: Arc<FlightSlot>,
    shutting_down: AtomicBool,
}

impl Inner {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        debug!("Lifecycle -> {}", lifecycle);
        *self.lifecycle.write().unwrap_or_else(|e| e.into_inner()) = lifecycle;
    }
}

/// Owner of the process set and its lifecycle.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        config: &ConductorConfig,
        descriptors: Arc<ServiceMap<ServiceDescriptor>>,
        registry: Arc<ProcessRegistry>,
        launcher: Arc<dyn ProcessLauncher>,
        probes: Arc<dyn Probes>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                descriptors,
                broker: config.broker_descriptor(),
                registry,
                launcher,
                probes,
                sink: DiagnosticSink::new(config.log_dir()),
                env_file: config.env_file(),
                timings: config.timings.clone(),
                bus,
                lifecycle: RwLock::new(Lifecycle::Stopped),
                flight: FlightSlot::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }

    /// The operation currently holding the single-flight slot.
    pub fn in_flight(&self) -> Option<OperationKind> {
        self.inner.flight.current()
    }

    pub fn broker_descriptor(&self) -> &BrokerDescriptor {
        &self.inner.broker
    }

    pub fn diagnostic_sink(&self) -> &DiagnosticSink {
        &self.inner.sink
    }

    /// Start the dependency and every service on a background task.
    ///
    /// Returns `None` without side effects if an operation is in flight or
    /// the set is not stopped.
    pub fn request_start(&self) -> Option<JoinHandle<()>> {
        if self.inner.is_shutting_down() {
            debug!("Start ignored: shutting down");
            return None;
        }
        let guard = self.inner.flight.try_acquire(OperationKind::Start)?;
        let lifecycle = self.inner.lifecycle();
        if !lifecycle.is_stopped() {
            debug!("Start ignored: services are {}", lifecycle);
            return None;
        }

        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            inner.start_all().await;
        }))
    }

    /// Stop everything on a background task.
    ///
    /// Returns `None` without side effects if an operation is in flight or
    /// nothing is running.
    pub fn request_stop(&self) -> Option<JoinHandle<()>> {
        let guard = self.inner.flight.try_acquire(OperationKind::Stop)?;
        if self.inner.lifecycle().is_stopped() {
            debug!("Stop ignored: nothing is running");
            return None;
        }

        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            inner.stop_all().await;
        }))
    }

    /// Stop one service if it is tracked, then launch it again.
    pub async fn restart(&self, id: ServiceId) -> Result<()> {
        let kind = OperationKind::Restart(id);
        let _guard = self.acquire(kind)?;
        self.inner.restart_one(id).await
    }

    /// Stop one service and forget its handle.
    pub async fn stop_one(&self, id: ServiceId) -> Result<()> {
        let kind = OperationKind::StopOne(id);
        let _guard = self.acquire(kind)?;
        self.inner.stop_one(id).await;
        Ok(())
    }

    fn acquire(&self, kind: OperationKind) -> Result<flight::FlightGuard> {
        self.inner.flight.try_acquire(kind).ok_or_else(|| {
            let running = self
                .in_flight()
                .map(|k| k.to_string())
                .unwrap_or_else(|| kind.to_string());
            ConductorError::OperationInFlight(running)
        })
    }

    /// Application-exit sequence: let an in-flight operation finish (bounded),
    /// then stop everything still running, inline.
    ///
    /// An operation that outlives the wait sees the shutdown flag before its
    /// next launch and aborts; anything it registered while the stop ran is
    /// stopped by a second pass.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        if !self
            .inner
            .flight
            .wait_idle(SupervisorConfig::SHUTDOWN_OPERATION_WAIT)
            .await
        {
            warn!(
                "Operation {:?} still running after {:?}, stopping anyway",
                self.in_flight(),
                SupervisorConfig::SHUTDOWN_OPERATION_WAIT
            );
        }

        if self.inner.lifecycle().is_stopped() && self.inner.registry.is_empty() {
            return;
        }

        let guard = self.inner.flight.try_acquire(OperationKind::Stop);
        if guard.is_none() {
            warn!(
                "Stopping while {:?} still holds the operation slot",
                self.in_flight()
            );
        }
        self.inner.stop_all().await;

        if !self.inner.registry.is_empty() {
            warn!("Processes were registered during shutdown, stopping them");
            self.inner.stop_all().await;
        }
    }
}
