//! Adaptive health monitor.
//!
//! One long-lived task. Each cycle probes the broker, then every service:
//! a service whose process is gone is unhealthy outright; a service confirmed
//! by a full probe within the freshness window gets only a TCP check; anything
//! else gets the HTTP health probe. The cycle publishes a complete snapshot
//! and picks the next interval from it: long when everything is healthy,
//! medium when something is, short when nothing is.

mod confirmed;
mod snapshot;

pub use confirmed::ConfirmedRegistry;
pub use snapshot::HealthSnapshot;

use crate::cancel::CancellationToken;
use crate::config::Timings;
use crate::events::EventBus;
use crate::platform;
use crate::probe::{HealthCheck, ProbeFailure, Probes};
use crate::process::{ProcessHandle, ProcessRegistry};
use crate::service::{ServiceDescriptor, ServiceMap};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const SCOPE: &str = "monitor";

/// Sleep before the next cycle, given the snapshot just published.
pub fn next_interval(snapshot: &HealthSnapshot, timings: &Timings) -> Duration {
    if snapshot.all_healthy() {
        timings.steady_interval
    } else if snapshot.any_healthy() {
        timings.partial_interval
    } else {
        timings.cold_interval
    }
}

pub struct HealthMonitor {
    descriptors: Arc<ServiceMap<ServiceDescriptor>>,
    registry: Arc<ProcessRegistry>,
    probes: Arc<dyn Probes>,
    confirmed: Arc<ConfirmedRegistry>,
    bus: EventBus,
    timings: Timings,
    cycle: u64,
    /// PID whose death has already been narrated, per service.
    reported_deaths: ServiceMap<Option<u32>>,
}

impl HealthMonitor {
    pub fn new(
        descriptors: Arc<ServiceMap<ServiceDescriptor>>,
        registry: Arc<ProcessRegistry>,
        probes: Arc<dyn Probes>,
        confirmed: Arc<ConfirmedRegistry>,
        bus: EventBus,
        timings: Timings,
    ) -> Self {
        Self {
            descriptors,
            registry,
            probes,
            confirmed,
            bus,
            timings,
            cycle: 0,
            reported_deaths: ServiceMap::from_fn(|_| None),
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run cycles until cancelled. A panic inside a cycle is logged and the
    /// loop carries on at the shortest interval.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Health monitor started");

        while !cancel.is_cancelled() {
            let interval = match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(snapshot) => next_interval(&snapshot, &self.timings),
                Err(panic) => {
                    self.bus.error(
                        SCOPE,
                        format!("Health check error: {}", panic_message(panic.as_ref())),
                    );
                    self.timings.cold_interval
                }
            };

            debug!("Next health check in {:?}", interval);
            if cancel
                .sleep_sliced(interval, self.timings.sleep_slice)
                .await
            {
                break;
            }
        }

        info!("Health monitor stopped");
    }

    /// Probe everything once and publish the result.
    pub async fn run_cycle(&mut self) -> HealthSnapshot {
        let detailed = self.timings.detailed_every_n_cycles > 0
            && self.cycle % self.timings.detailed_every_n_cycles == 0;
        self.cycle += 1;

        let broker = self.probes.broker().await;

        let handles = self.registry.services();
        let descriptors = self.descriptors.clone();
        let mut services = ServiceMap::from_fn(|_| false);
        for (id, descriptor) in descriptors.iter() {
            services[id] = self
                .check_service(descriptor, handles[id].as_ref(), detailed)
                .await;
        }

        let snapshot = HealthSnapshot::new(broker, services).with_cycle(self.cycle);
        self.bus.publish_snapshot(snapshot.clone());
        snapshot
    }

    async fn check_service(
        &mut self,
        descriptor: &ServiceDescriptor,
        handle: Option<&Arc<dyn ProcessHandle>>,
        detailed: bool,
    ) -> bool {
        let id = descriptor.id;

        let Some(handle) = handle else {
            self.confirmed.revoke(id);
            return false;
        };
        if !handle.is_alive() {
            self.confirmed.revoke(id);
            self.report_death(descriptor, handle.as_ref());
            return false;
        }

        if self.confirmed.is_fresh(id) {
            if self.probes.port_listening(descriptor.port).await {
                return true;
            }
            self.confirmed.revoke(id);
            self.bus.warn(
                &descriptor.display_name,
                format!("{} health check failed", descriptor.display_name),
            );
            return false;
        }

        let check = self
            .probes
            .health(descriptor.port, descriptor.policy.probe_timeout)
            .await;
        self.report_check(descriptor, &check, detailed);

        if check.healthy {
            if self.confirmed.confirm(id) {
                self.bus.info(
                    &descriptor.display_name,
                    format!("{} is healthy", descriptor.display_name),
                );
            }
            true
        } else {
            let had_confirmation = self.confirmed.revoke(id);
            let busy = descriptor.policy.busy_tolerant && check.is_timeout();
            if had_confirmation && busy {
                debug!(
                    "{} stopped answering in time, treating as busy",
                    descriptor.display_name
                );
            } else if had_confirmation {
                self.bus.warn(
                    &descriptor.display_name,
                    format!("{} health check failed", descriptor.display_name),
                );
            }
            false
        }
    }

    fn report_death(&mut self, descriptor: &ServiceDescriptor, handle: &dyn ProcessHandle) {
        let pid = handle.pid();
        if self.reported_deaths[descriptor.id] == Some(pid) {
            return;
        }
        self.reported_deaths[descriptor.id] = Some(pid);

        let code = handle.exit_code();
        self.bus.error(
            &descriptor.display_name,
            format!(
                "{} process died (exit code: {})",
                descriptor.display_name,
                platform::describe_exit(code)
            ),
        );
        if code.is_some_and(platform::is_access_violation) {
            self.bus.error(
                &descriptor.display_name,
                format!(
                    "   Access violation (exit code {}) - likely dependency issue",
                    platform::describe_exit(code)
                ),
            );
        }
    }

    /// Narrate a full probe. Refusals are expected while booting and stay at
    /// debug; other failures reach the event channel only on detailed cycles.
    fn report_check(&self, descriptor: &ServiceDescriptor, check: &HealthCheck, detailed: bool) {
        let name = &descriptor.display_name;
        match &check.failure {
            None if detailed => self.bus.debug(
                name,
                format!(
                    "{} detailed health: HTTP {} {}",
                    name,
                    check.status_code.unwrap_or_default(),
                    check.body.as_deref().unwrap_or("")
                ),
            ),
            None if !check.healthy => debug!(
                "{} answered health check with HTTP {}",
                name,
                check.status_code.unwrap_or_default()
            ),
            None => {}
            Some(ProbeFailure::ConnectionRefused) => {
                debug!("{} not accepting connections yet", name)
            }
            Some(ProbeFailure::Timeout) if descriptor.policy.busy_tolerant => {
                debug!("{} health check timed out, treating as busy", name)
            }
            Some(failure) if detailed => self
                .bus
                .warn(name, format!("{} health check error: {}", name, failure)),
            Some(failure) => debug!("{} health check error: {}", name, failure),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConductorConfig;
    use crate::events::Event;
    use crate::service::ServiceId;
    use crate::testing::{FakeHandle, ScriptedProbes};
    use tokio::sync::broadcast::error::TryRecvError;

    struct Harness {
        monitor: HealthMonitor,
        registry: Arc<ProcessRegistry>,
        probes: Arc<ScriptedProbes>,
        confirmed: Arc<ConfirmedRegistry>,
        bus: EventBus,
    }

    fn harness() -> Harness {
        let config = ConductorConfig::with_base_dir("/tmp/conductor-monitor-test");
        let registry = Arc::new(ProcessRegistry::new());
        let probes = Arc::new(ScriptedProbes::new());
        let confirmed = Arc::new(ConfirmedRegistry::new(config.timings.confirmation_ttl));
        let bus = EventBus::new();
        let monitor = HealthMonitor::new(
            Arc::new(config.descriptors()),
            registry.clone(),
            probes.clone(),
            confirmed.clone(),
            bus.clone(),
            config.timings.clone(),
        );
        Harness {
            monitor,
            registry,
            probes,
            confirmed,
            bus,
        }
    }

    fn track(registry: &ProcessRegistry, id: ServiceId, pid: u32) -> Arc<FakeHandle> {
        let handle = Arc::new(FakeHandle::new(pid));
        registry.register(id, handle.clone());
        handle
    }

    fn log_messages(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<String> {
        let mut messages = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(Event::LogLine(line)) => messages.push(line.message),
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => {}
                Err(_) => return messages,
            }
        }
    }

    #[test]
    fn test_interval_tiers() {
        let timings = Timings::default();
        let all = HealthSnapshot::new(false, ServiceMap::from_fn(|_| true));
        let some = HealthSnapshot::new(true, ServiceMap::from_fn(|id| id == ServiceId::Gary));
        let none = HealthSnapshot::new(true, ServiceMap::from_fn(|_| false));

        assert_eq!(next_interval(&all, &timings), timings.steady_interval);
        assert_eq!(next_interval(&some, &timings), timings.partial_interval);
        assert_eq!(next_interval(&none, &timings), timings.cold_interval);
    }

    #[tokio::test]
    async fn test_untracked_services_are_unhealthy_even_if_serving() {
        let mut h = harness();
        h.probes.set_broker(true);
        for id in ServiceId::ALL {
            h.probes.set_serving(id.default_port());
        }

        let snapshot = h.monitor.run_cycle().await;

        assert!(snapshot.broker);
        assert!(!snapshot.any_healthy());
        assert_eq!(h.probes.health_calls(8000), 0);
    }

    #[tokio::test]
    async fn test_confirmation_switches_to_liveness_probe() {
        let mut h = harness();
        track(&h.registry, ServiceId::Gary, 10);
        h.probes.set_serving(8000);

        assert!(h.monitor.run_cycle().await.is_healthy(ServiceId::Gary));
        assert_eq!(h.probes.health_calls(8000), 1);
        assert!(h.confirmed.is_fresh(ServiceId::Gary));

        assert!(h.monitor.run_cycle().await.is_healthy(ServiceId::Gary));
        assert_eq!(h.probes.health_calls(8000), 1);
        assert_eq!(h.probes.port_calls(8000), 1);
    }

    #[tokio::test]
    async fn test_liveness_failure_revokes_confirmation() {
        let mut h = harness();
        track(&h.registry, ServiceId::StableAudio, 11);
        h.probes.set_serving(8005);
        h.monitor.run_cycle().await;
        let mut rx = h.bus.subscribe();

        h.probes.set_down(8005);
        let snapshot = h.monitor.run_cycle().await;

        assert!(!snapshot.is_healthy(ServiceId::StableAudio));
        assert!(!h.confirmed.is_fresh(ServiceId::StableAudio));
        assert!(log_messages(&mut rx)
            .iter()
            .any(|m| m.ends_with("health check failed")));

        // Next cycle goes back to the full probe
        h.monitor.run_cycle().await;
        assert_eq!(h.probes.health_calls(8005), 2);
    }

    #[tokio::test]
    async fn test_stale_confirmation_cannot_mask_removed_process() {
        let mut h = harness();
        track(&h.registry, ServiceId::MelodyFlow, 12);
        h.probes.set_serving(8002);
        h.monitor.run_cycle().await;
        assert!(h.confirmed.is_fresh(ServiceId::MelodyFlow));

        h.registry.remove(ServiceId::MelodyFlow);
        let snapshot = h.monitor.run_cycle().await;

        assert!(!snapshot.is_healthy(ServiceId::MelodyFlow));
        assert!(!h.confirmed.is_fresh(ServiceId::MelodyFlow));
    }

    #[tokio::test]
    async fn test_dead_process_reported_once_with_access_violation_hint() {
        let mut h = harness();
        let handle = track(&h.registry, ServiceId::MelodyFlow, 13);
        h.probes.set_serving(8002);
        h.monitor.run_cycle().await;
        let mut rx = h.bus.subscribe();

        handle.exit_with(3_221_225_477);
        let snapshot = h.monitor.run_cycle().await;
        h.monitor.run_cycle().await;

        assert!(!snapshot.is_healthy(ServiceId::MelodyFlow));
        assert!(!h.confirmed.is_fresh(ServiceId::MelodyFlow));

        let messages = log_messages(&mut rx);
        let deaths: Vec<_> = messages
            .iter()
            .filter(|m| m.contains("process died"))
            .collect();
        assert_eq!(deaths.len(), 1);
        assert!(deaths[0].contains("3221225477"));
        assert!(messages.iter().any(|m| m.contains("Access violation")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_timeout_after_expired_confirmation_is_quiet() {
        let mut h = harness();
        track(&h.registry, ServiceId::Gary, 15);
        track(&h.registry, ServiceId::MelodyFlow, 16);
        h.probes.set_serving(8000);
        h.probes.set_serving(8002);
        h.monitor.run_cycle().await;
        assert!(h.confirmed.is_fresh(ServiceId::Gary));

        tokio::time::advance(h.monitor.timings.confirmation_ttl + Duration::from_secs(1)).await;
        h.probes
            .set_health(8000, HealthCheck::failed(ProbeFailure::Timeout));
        h.probes
            .set_health(8002, HealthCheck::failed(ProbeFailure::Timeout));
        let mut rx = h.bus.subscribe();

        let snapshot = h.monitor.run_cycle().await;

        assert!(!snapshot.is_healthy(ServiceId::Gary));
        assert!(!snapshot.is_healthy(ServiceId::MelodyFlow));
        let failures: Vec<String> = log_messages(&mut rx)
            .into_iter()
            .filter(|m| m.ends_with("health check failed"))
            .collect();
        assert_eq!(failures, vec!["terry (melodyflow) health check failed".to_string()]);
    }

    #[tokio::test]
    async fn test_refused_probe_never_confirms() {
        let mut h = harness();
        track(&h.registry, ServiceId::Gary, 14);
        h.probes.set_listening(8000, true);

        for _ in 0..3 {
            let snapshot = h.monitor.run_cycle().await;
            assert!(!snapshot.is_healthy(ServiceId::Gary));
        }
        assert!(!h.confirmed.is_fresh(ServiceId::Gary));
        assert_eq!(h.probes.health_calls(8000), 3);
    }

    #[tokio::test]
    async fn test_snapshot_is_published_each_cycle() {
        let mut h = harness();
        let mut watch = h.bus.watch_snapshot();

        h.monitor.run_cycle().await;
        assert!(watch.has_changed().unwrap());
        assert_eq!(watch.borrow_and_update().cycle, 1);

        h.monitor.run_cycle().await;
        assert_eq!(h.bus.latest_snapshot().cycle, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_within_one_slice() {
        let h = harness();
        let cancel = CancellationToken::new();
        let task = h.monitor.spawn(cancel.clone());

        // Let the first cycle finish and the cold-interval sleep begin.
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        cancel.cancel();
        let stopped_at = tokio::time::Instant::now();

        task.await.unwrap();
        assert!(stopped_at.elapsed() <= Duration::from_millis(200));
    }
}
