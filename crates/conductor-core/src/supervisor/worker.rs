//! The start, stop, restart and stop-one sequences.
//!
//! Every step narrates on the event bus. Nothing here returns an error for a
//! single failed service; the sequence logs it and moves on.

use super::{Inner, Lifecycle};
use crate::config::SupervisorConfig;
use crate::env::{compose_env, utf8_vars, EnvOverlay};
use crate::error::{ConductorError, Result};
use crate::events::{OperationKind, OperationOutcome};
use crate::platform;
use crate::process::{stop_handle, LaunchSpec, ProcessHandle, StopOutcome};
use crate::retry::{retry_async, RetryConfig};
use crate::service::{ServiceDescriptor, ServiceId};
use chrono::Local;
use std::sync::Arc;

const SCOPE: &str = "supervisor";

impl Inner {
    /// This process's environment, minus anything that is not UTF-8.
    fn inherited_env(&self) -> Vec<(String, String)> {
        let (vars, skipped) = utf8_vars(std::env::vars_os());
        for name in skipped {
            self.bus.warn(
                SCOPE,
                format!("Not passing environment variable {} to services: not UTF-8", name),
            );
        }
        vars
    }

    fn load_overlay(&self) -> EnvOverlay {
        match EnvOverlay::load(&self.env_file) {
            Ok(overlay) => overlay,
            Err(e) => {
                self.bus
                    .warn(SCOPE, format!("Could not read environment overrides: {}", e));
                EnvOverlay::default()
            }
        }
    }

    pub(super) async fn start_all(&self) {
        let outcome = match self.run_start_sequence().await {
            Ok(()) => OperationOutcome::Completed,
            Err(reason) => {
                self.bus.error(SCOPE, reason.clone());
                OperationOutcome::Aborted { reason }
            }
        };
        self.bus.operation_completed(OperationKind::Start, outcome);
    }

    /// Broker first, then every service in declaration order. An `Err` is
    /// the abort reason; already-launched processes stay up.
    async fn run_start_sequence(&self) -> std::result::Result<(), String> {
        self.bus.info(SCOPE, "Starting backend services...");

        let since = self.launch_broker()?;
        self.confirm_broker().await?;

        let overlay = self.load_overlay();
        let descriptors = self.descriptors.clone();
        for (_, descriptor) in descriptors.iter() {
            if self.is_shutting_down() {
                return Err("Shutdown in progress, not starting remaining services".to_string());
            }
            let Ok(handle) = self.launch_service(descriptor, &overlay) else {
                continue;
            };
            tokio::time::sleep(self.timings.settle_delay).await;
            self.settle_check(descriptor, handle.as_ref());
        }

        self.set_lifecycle(Lifecycle::Running { since });
        self.bus.info(SCOPE, "All services started");
        self.bus
            .info(SCOPE, "Services may take a moment to become healthy");
        self.bus.info(SCOPE, "Check debug logs if services fail to start:");
        for (id, _) in descriptors.iter() {
            self.bus.info(
                SCOPE,
                format!("   {}", self.sink.path_for(id.as_str()).display()),
            );
        }
        Ok(())
    }

    /// Spawn the broker and mark the set as starting.
    fn launch_broker(&self) -> std::result::Result<chrono::DateTime<Local>, String> {
        let broker = &self.broker;
        if !broker.executable.exists() {
            return Err(format!(
                "{} not found at {} - please run the installer first",
                broker.display_name,
                broker.executable.display()
            ));
        }

        self.bus
            .info(SCOPE, format!("Starting {} server...", broker.display_name));
        let spec = LaunchSpec::new(broker.display_name.clone(), broker.executable.clone())
            .with_working_dir(broker.working_dir.clone());
        let handle = self
            .launcher
            .launch(&spec)
            .map_err(|e| format!("Failed to start {}: {}", broker.display_name, e))?;

        let since = Local::now();
        self.registry.register_broker(handle.clone());
        self.set_lifecycle(Lifecycle::Starting { since });
        self.bus.info(
            SCOPE,
            format!(
                "{} process started (PID: {})",
                broker.display_name,
                handle.pid()
            ),
        );
        Ok(since)
    }

    /// Settle, make sure the broker is still alive, then wait for it to
    /// answer PING with bounded retries.
    async fn confirm_broker(&self) -> std::result::Result<(), String> {
        let name = &self.broker.display_name;
        tokio::time::sleep(self.timings.settle_delay).await;

        if let Some(handle) = self.registry.broker() {
            if !handle.is_alive() {
                return Err(format!(
                    "{} process died immediately (exit code: {})",
                    name,
                    platform::describe_exit(handle.exit_code())
                ));
            }
        }

        let retry = RetryConfig::fixed(
            self.timings.broker_confirm_attempts,
            self.timings.broker_confirm_backoff,
        );
        let (result, stats) = retry_async(
            &retry,
            || async {
                if self.probes.broker().await {
                    Ok(())
                } else {
                    Err(format!("{} not responding", name))
                }
            },
            |_: &String| true,
        )
        .await;

        match result {
            Ok(()) => {
                self.bus
                    .info(SCOPE, format!("{} server is responding", name));
                Ok(())
            }
            Err(_) => Err(format!(
                "{} did not respond after {} attempts, not starting services",
                name, stats.attempts
            )),
        }
    }

    /// Check prerequisites, compose the environment, launch, and register.
    fn launch_service(
        &self,
        descriptor: &ServiceDescriptor,
        overlay: &EnvOverlay,
    ) -> Result<Arc<dyn ProcessHandle>> {
        let name = &descriptor.display_name;
        let interpreter_found = descriptor.interpreter.exists();
        let script_found = descriptor.script.exists();
        if !interpreter_found || !script_found {
            self.bus.error(
                SCOPE,
                format!(
                    "{} files not found - interpreter: {}, script: {}",
                    name, interpreter_found, script_found
                ),
            );
            return Err(ConductorError::PrerequisitesMissing {
                target: descriptor.id.to_string(),
                interpreter_found,
                script_found,
            });
        }

        self.bus.info(
            SCOPE,
            format!("Starting {} on port {}...", name, descriptor.port),
        );

        let log_file = self.sink.path_for(descriptor.id.as_str());
        let env = compose_env(self.inherited_env(), overlay, &descriptor.policy.env_overrides);
        let spec = LaunchSpec::new(descriptor.id.as_str(), descriptor.interpreter.clone())
            .with_arg(descriptor.script.to_string_lossy())
            .with_working_dir(descriptor.working_dir.clone())
            .with_env(env)
            .with_log_file(&log_file);

        let handle = self.launcher.launch(&spec).map_err(|e| {
            self.bus
                .error(SCOPE, format!("Failed to start {}: {}", name, e));
            e
        })?;

        self.registry.register(descriptor.id, handle.clone());
        self.bus.info(
            SCOPE,
            format!("{} process started (PID: {})", name, handle.pid()),
        );
        self.bus
            .debug(SCOPE, format!("   Debug log: {}", log_file.display()));
        Ok(handle)
    }

    /// After the settle delay, surface an immediate exit with the head of its
    /// captured output.
    fn settle_check(&self, descriptor: &ServiceDescriptor, handle: &dyn ProcessHandle) {
        let name = &descriptor.display_name;
        if handle.is_alive() {
            self.bus
                .info(SCOPE, format!("   {} process running", name));
            return;
        }

        let code = handle.exit_code();
        self.bus.error(
            SCOPE,
            format!(
                "{} process died immediately (exit code: {})",
                name,
                platform::describe_exit(code)
            ),
        );

        let head = self
            .sink
            .head(descriptor.id.as_str(), SupervisorConfig::DIAGNOSTIC_HEAD_LINES);
        if head.is_empty() {
            self.bus.error(SCOPE, "   No error output captured");
        }
        for line in head {
            self.bus.error(SCOPE, format!("   ERROR: {}", line));
        }

        if code.is_some_and(platform::is_access_violation) {
            self.bus.error(
                SCOPE,
                format!(
                    "   Access violation (exit code {}) - check GPU drivers, dependencies and antivirus",
                    platform::describe_exit(code)
                ),
            );
        }
    }

    /// Graceful-then-forced stop of one tracked process, narrated.
    async fn stop_tracked(&self, name: &str, handle: &Arc<dyn ProcessHandle>) {
        if !handle.is_alive() {
            return;
        }
        match stop_handle(
            handle,
            self.timings.terminate_wait,
            self.timings.kill_wait,
            self.timings.exit_poll_interval,
        )
        .await
        {
            StopOutcome::Terminated => self.bus.info(SCOPE, format!("Stopped {}", name)),
            StopOutcome::Killed => self.bus.info(SCOPE, format!("Force stopped {}", name)),
            StopOutcome::Unresponsive => self.bus.error(
                SCOPE,
                format!("Error stopping {}: still running after kill", name),
            ),
        }
    }

    pub(super) async fn stop_all(&self) {
        let since = self.lifecycle().since().unwrap_or_else(Local::now);
        self.set_lifecycle(Lifecycle::Stopping { since });
        self.bus.info(SCOPE, "Stopping backend services...");

        for (id, handle) in self.registry.all() {
            let name = self.descriptors[id].display_name.clone();
            self.stop_tracked(&name, &handle).await;
            self.registry.remove(id);
        }
        if let Some(handle) = self.registry.remove_broker() {
            self.stop_tracked(&self.broker.display_name, &handle).await;
        }

        let killed = self.launcher.kill_by_name(&self.broker.process_name);
        self.bus.info(
            SCOPE,
            format!(
                "Stopped {} processes ({} by name)",
                self.broker.display_name, killed
            ),
        );

        self.set_lifecycle(Lifecycle::Stopped);
        self.bus.info(SCOPE, "All services stopped");
        self.bus
            .operation_completed(OperationKind::Stop, OperationOutcome::Completed);
    }

    pub(super) async fn stop_one(&self, id: ServiceId) {
        let name = self.descriptors[id].display_name.clone();
        match self.registry.get(id) {
            Some(handle) => {
                self.stop_tracked(&name, &handle).await;
                self.registry.remove(id);
            }
            None => self.bus.info(SCOPE, format!("{} is not running", name)),
        }
        self.bus
            .operation_completed(OperationKind::StopOne(id), OperationOutcome::Completed);
    }

    pub(super) async fn restart_one(&self, id: ServiceId) -> Result<()> {
        let descriptor = self.descriptors[id].clone();
        let name = descriptor.display_name.clone();
        self.bus.info(SCOPE, format!("Restarting {}...", name));

        if let Some(handle) = self.registry.remove(id) {
            self.stop_tracked(&name, &handle).await;
            if handle.is_alive() {
                self.bus
                    .error(SCOPE, format!("Restart of {}: old process did not stop", name));
            }
        }

        let overlay = self.load_overlay();
        let result = self.launch_service(&descriptor, &overlay);
        let outcome = match &result {
            Ok(_) => {
                if self.lifecycle().is_stopped() {
                    let since = Local::now();
                    self.set_lifecycle(Lifecycle::Running { since });
                }
                self.bus.info(SCOPE, format!("{} restarted", name));
                OperationOutcome::Completed
            }
            Err(e) => {
                self.bus
                    .error(SCOPE, format!("Restart of {}: launch failed: {}", name, e));
                OperationOutcome::Aborted {
                    reason: e.to_string(),
                }
            }
        };
        self.bus
            .operation_completed(OperationKind::Restart(id), outcome);
        result.map(|_| ())
    }
}
