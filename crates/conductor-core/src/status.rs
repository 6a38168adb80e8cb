//! Display-state derivation for the control surface.
//!
//! Everything here is recomputed from scratch on each query out of the
//! lifecycle, the process registry and the latest snapshot. Only
//! [`observe`] touches the network: it adds port checks where the snapshot
//! alone cannot separate "busy" from "broken".

use crate::events::OperationKind;
use crate::monitor::HealthSnapshot;
use crate::probe::Probes;
use crate::process::ProcessRegistry;
use crate::service::{ServiceDescriptor, ServiceMap};
use crate::supervisor::{format_uptime, Lifecycle};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Stopped,
    Starting,
    Running,
    Error,
}

impl DisplayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayState::Stopped => "stopped",
            DisplayState::Starting => "starting",
            DisplayState::Running => "running",
            DisplayState::Error => "error",
        }
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the registry says about a service's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Untracked,
    Alive,
    Exited,
}

/// Inputs for one service's display state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceObservation {
    pub process: ProcessState,
    pub healthy: bool,
    /// Only probed when the process is alive but the snapshot says unhealthy.
    pub port_listening: bool,
}

impl ServiceObservation {
    fn healthy_or_listening(&self) -> bool {
        self.process == ProcessState::Alive && (self.healthy || self.port_listening)
    }
}

/// Everything [`build_report`] needs, gathered at one instant.
#[derive(Debug, Clone)]
pub struct Observations {
    pub services: ServiceMap<ServiceObservation>,
    pub broker_healthy: bool,
    pub broker_listening: bool,
}

/// Per-service display state.
///
/// A busy-tolerant service that fails its health probe stays `starting` as
/// long as its port is listening; without the listener it is `error`.
pub fn service_state(
    active: bool,
    observation: &ServiceObservation,
    busy_tolerant: bool,
) -> DisplayState {
    if !active {
        return DisplayState::Stopped;
    }
    match observation.process {
        ProcessState::Untracked | ProcessState::Exited => DisplayState::Error,
        ProcessState::Alive if observation.healthy => DisplayState::Running,
        ProcessState::Alive if busy_tolerant && !observation.port_listening => DisplayState::Error,
        ProcessState::Alive => DisplayState::Starting,
    }
}

pub fn broker_state(active: bool, healthy: bool) -> DisplayState {
    match (active, healthy) {
        (false, _) => DisplayState::Stopped,
        (true, true) => DisplayState::Running,
        (true, false) => DisplayState::Error,
    }
}

/// Whole-system state.
///
/// `error` as soon as any tracked service process has exited. Otherwise
/// services count when healthy or at least listening, and the broker counts
/// when healthy or listening on its port. Nothing up at all is `error`,
/// except while the start sequence has not finished.
pub fn overall_state(
    lifecycle: &Lifecycle,
    services: &ServiceMap<ServiceObservation>,
    broker_up: bool,
) -> DisplayState {
    if lifecycle.is_stopped() {
        return DisplayState::Stopped;
    }
    if services
        .values()
        .any(|observation| observation.process == ProcessState::Exited)
    {
        return DisplayState::Error;
    }

    let up = services
        .values()
        .filter(|observation| observation.healthy_or_listening())
        .count();
    let total = services.values().count();

    if up == total && broker_up {
        DisplayState::Running
    } else if up > 0 || broker_up || matches!(lifecycle, Lifecycle::Starting { .. }) {
        DisplayState::Starting
    } else {
        DisplayState::Error
    }
}

/// One-line health summary: `[HH:MM:SS] ✅ redis | ❌ gary main | ...`.
pub fn render_summary(
    snapshot: &HealthSnapshot,
    broker_name: &str,
    descriptors: &ServiceMap<ServiceDescriptor>,
) -> String {
    let icon = |healthy: bool| if healthy { "✅" } else { "❌" };

    let mut parts = vec![format!("{} {}", icon(snapshot.broker), broker_name)];
    parts.extend(
        descriptors
            .iter()
            .map(|(id, d)| format!("{} {}", icon(snapshot.services[id]), d.display_name)),
    );

    format!("[{}] {}", snapshot.at.format("%H:%M:%S"), parts.join(" | "))
}

/// Consolidated state for polling renderers.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayReport {
    pub lifecycle: Lifecycle,
    pub uptime_secs: Option<u64>,
    pub uptime: Option<String>,
    pub in_flight: Option<OperationKind>,
    pub broker: DisplayState,
    pub services: ServiceMap<DisplayState>,
    pub overall: DisplayState,
    pub summary: String,
}

/// Gather registry state and the port checks the derivation needs.
pub async fn observe(
    registry: &ProcessRegistry,
    snapshot: &HealthSnapshot,
    probes: &dyn Probes,
    descriptors: &ServiceMap<ServiceDescriptor>,
    broker_port: u16,
) -> Observations {
    let handles = registry.services();
    let mut services = ServiceMap::from_fn(|_| ServiceObservation {
        process: ProcessState::Untracked,
        healthy: false,
        port_listening: false,
    });

    for (id, descriptor) in descriptors.iter() {
        let process = match &handles[id] {
            None => ProcessState::Untracked,
            Some(handle) if handle.is_alive() => ProcessState::Alive,
            Some(_) => ProcessState::Exited,
        };
        let healthy = snapshot.services[id];
        let port_listening = process == ProcessState::Alive
            && !healthy
            && probes.port_listening(descriptor.port).await;

        services[id] = ServiceObservation {
            process,
            healthy,
            port_listening,
        };
    }

    let broker_listening = !snapshot.broker && probes.port_listening(broker_port).await;

    Observations {
        services,
        broker_healthy: snapshot.broker,
        broker_listening,
    }
}

/// Derive the full report from one set of observations.
pub fn build_report(
    lifecycle: Lifecycle,
    in_flight: Option<OperationKind>,
    snapshot: &HealthSnapshot,
    observations: &Observations,
    descriptors: &ServiceMap<ServiceDescriptor>,
    broker_name: &str,
) -> DisplayReport {
    let active = !lifecycle.is_stopped();
    let services = observations.services.map(|id, observation| {
        service_state(active, observation, descriptors[id].policy.busy_tolerant)
    });
    let uptime = lifecycle.uptime();

    DisplayReport {
        lifecycle,
        uptime_secs: uptime.map(|u| u.as_secs()),
        uptime: uptime.map(format_uptime),
        in_flight,
        broker: broker_state(active, observations.broker_healthy),
        services,
        overall: overall_state(
            &lifecycle,
            &observations.services,
            observations.broker_healthy || observations.broker_listening,
        ),
        summary: render_summary(snapshot, broker_name, descriptors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConductorConfig;
    use crate::service::ServiceId;
    use chrono::Local;

    fn obs(process: ProcessState, healthy: bool, port_listening: bool) -> ServiceObservation {
        ServiceObservation {
            process,
            healthy,
            port_listening,
        }
    }

    #[test]
    fn test_service_state_table() {
        use ProcessState::*;

        assert_eq!(service_state(false, &obs(Alive, true, true), false), DisplayState::Stopped);
        assert_eq!(service_state(true, &obs(Untracked, false, false), false), DisplayState::Error);
        assert_eq!(service_state(true, &obs(Exited, true, true), false), DisplayState::Error);
        assert_eq!(service_state(true, &obs(Alive, true, false), false), DisplayState::Running);
        assert_eq!(service_state(true, &obs(Alive, false, false), false), DisplayState::Starting);
    }

    #[test]
    fn test_busy_tolerant_service() {
        let busy = obs(ProcessState::Alive, false, true);
        let dead_port = obs(ProcessState::Alive, false, false);

        assert_eq!(service_state(true, &busy, true), DisplayState::Starting);
        assert_eq!(service_state(true, &dead_port, true), DisplayState::Error);
    }

    #[test]
    fn test_broker_state() {
        assert_eq!(broker_state(false, true), DisplayState::Stopped);
        assert_eq!(broker_state(true, true), DisplayState::Running);
        assert_eq!(broker_state(true, false), DisplayState::Error);
    }

    #[test]
    fn test_overall_state() {
        let all_up = ServiceMap::from_fn(|_| obs(ProcessState::Alive, true, false));
        let listening = ServiceMap::from_fn(|_| obs(ProcessState::Alive, false, true));
        let none = ServiceMap::from_fn(|_| obs(ProcessState::Untracked, false, false));
        let mut one_dead = all_up.clone();
        one_dead[ServiceId::StableAudio] = obs(ProcessState::Exited, false, false);

        let since = Local::now();
        let running = Lifecycle::Running { since };
        let starting = Lifecycle::Starting { since };

        assert_eq!(overall_state(&Lifecycle::Stopped, &all_up, true), DisplayState::Stopped);
        assert_eq!(overall_state(&running, &all_up, true), DisplayState::Running);
        assert_eq!(overall_state(&running, &listening, true), DisplayState::Running);
        assert_eq!(overall_state(&running, &all_up, false), DisplayState::Starting);
        assert_eq!(overall_state(&running, &none, true), DisplayState::Starting);
        assert_eq!(overall_state(&running, &none, false), DisplayState::Error);
        assert_eq!(overall_state(&starting, &none, false), DisplayState::Starting);
        assert_eq!(overall_state(&starting, &one_dead, true), DisplayState::Error);
    }

    #[test]
    fn test_render_summary() {
        let descriptors = ConductorConfig::with_base_dir("/opt/conductor").descriptors();
        let mut snapshot =
            HealthSnapshot::new(true, ServiceMap::from_fn(|id| id == ServiceId::MelodyFlow));
        snapshot.at = Local::now();

        let summary = render_summary(&snapshot, "redis", &descriptors);
        assert!(summary.ends_with(
            "] ✅ redis | ❌ gary main | ✅ terry (melodyflow) | ❌ jerry (stable audio open small)"
        ));
        assert!(summary.starts_with('['));
    }

    #[test]
    fn test_build_report_when_stopped() {
        let descriptors = ConductorConfig::with_base_dir("/opt/conductor").descriptors();
        let snapshot = HealthSnapshot::empty();
        let observations = Observations {
            services: ServiceMap::from_fn(|_| obs(ProcessState::Untracked, false, false)),
            broker_healthy: false,
            broker_listening: false,
        };

        let report = build_report(
            Lifecycle::Stopped,
            None,
            &snapshot,
            &observations,
            &descriptors,
            "redis",
        );

        assert_eq!(report.overall, DisplayState::Stopped);
        assert_eq!(report.broker, DisplayState::Stopped);
        assert!(report.services.values().all(|s| *s == DisplayState::Stopped));
        assert!(report.uptime_secs.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["services"]["gary"], "stopped");
        assert_eq!(json["lifecycle"]["state"], "stopped");
    }
}
