//! Centralized configuration for the conductor.
//!
//! Compile-time constants for monitor cadence, supervisor timing, and probe
//! policy, plus the runtime [`ConductorConfig`] loaded from a JSON file.

use crate::error::{ConductorError, Result};
use crate::platform;
use crate::service::{
    BrokerDescriptor, BrokerEndpoint, ServiceDescriptor, ServiceId, ServiceMap, ServicePolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "conductor";
    pub const CONFIG_FILE_NAME: &'static str = "conductor.json";
    pub const ENV_FILE_NAME: &'static str = ".env";
    pub const SERVICES_DIR_NAME: &'static str = "services";
}

/// Health monitor cadence.
pub struct MonitorConfig;

impl MonitorConfig {
    /// Every service confirmed healthy.
    pub const STEADY_INTERVAL: Duration = Duration::from_secs(15);
    /// At least one service healthy.
    pub const PARTIAL_INTERVAL: Duration = Duration::from_secs(8);
    /// Nothing healthy (cold start or outage).
    pub const COLD_INTERVAL: Duration = Duration::from_secs(3);
    pub const SLEEP_SLICE: Duration = Duration::from_millis(100);
    pub const CONFIRMATION_TTL: Duration = Duration::from_secs(300);
    pub const DETAILED_EVERY_N_CYCLES: u64 = 20;
}

/// Supervisor worker timing.
pub struct SupervisorConfig;

impl SupervisorConfig {
    pub const SETTLE_DELAY: Duration = Duration::from_secs(3);
    pub const BROKER_CONFIRM_ATTEMPTS: u32 = 5;
    pub const BROKER_CONFIRM_BACKOFF: Duration = Duration::from_secs(2);
    pub const TERMINATE_WAIT: Duration = Duration::from_secs(5);
    pub const KILL_WAIT: Duration = Duration::from_secs(2);
    pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
    pub const DIAGNOSTIC_HEAD_LINES: usize = 5;
    pub const SHUTDOWN_OPERATION_WAIT: Duration = Duration::from_secs(10);
    pub const SHUTDOWN_MONITOR_WAIT: Duration = Duration::from_secs(3);
}

/// Probe timeouts and formatting limits.
pub struct ProbeConfig;

impl ProbeConfig {
    pub const LOCAL_HOST: &'static str = "localhost";
    pub const HEALTH_PATH: &'static str = "/health";
    pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(3);
    pub const BUSY_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
    pub const BODY_PREVIEW_CHARS: usize = 200;
    pub const ERROR_DETAIL_CHARS: usize = 100;
}

/// Broker (redis) defaults.
pub struct BrokerConfig;

impl BrokerConfig {
    pub const DISPLAY_NAME: &'static str = "redis";
    pub const DEFAULT_PORT: u16 = 6379;
    pub const ALT_PORT: u16 = 6380;
    pub const PING_TIMEOUT: Duration = Duration::from_secs(2);
    pub const DIR_NAME: &'static str = "redis";
    pub const PROCESS_NAME: &'static str = "redis-server";
}

/// Host resource sampling.
pub struct SystemConfig;

impl SystemConfig {
    /// Readings younger than this are reused instead of sampled again.
    pub const SAMPLE_TTL: Duration = Duration::from_secs(1);
}

/// Event channel sizing.
pub struct EventConfig;

impl EventConfig {
    pub const CHANNEL_CAPACITY: usize = 256;
    pub const LOG_HISTORY: usize = 500;
}

/// Serialize `Duration` as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Runtime timing knobs. Defaults come from the constant tables above;
/// tests compress them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    #[serde(with = "millis", rename = "steady_interval_ms")]
    pub steady_interval: Duration,
    #[serde(with = "millis", rename = "partial_interval_ms")]
    pub partial_interval: Duration,
    #[serde(with = "millis", rename = "cold_interval_ms")]
    pub cold_interval: Duration,
    #[serde(with = "millis", rename = "sleep_slice_ms")]
    pub sleep_slice: Duration,
    #[serde(with = "millis", rename = "confirmation_ttl_ms")]
    pub confirmation_ttl: Duration,
    pub detailed_every_n_cycles: u64,
    #[serde(with = "millis", rename = "settle_delay_ms")]
    pub settle_delay: Duration,
    pub broker_confirm_attempts: u32,
    #[serde(with = "millis", rename = "broker_confirm_backoff_ms")]
    pub broker_confirm_backoff: Duration,
    #[serde(with = "millis", rename = "terminate_wait_ms")]
    pub terminate_wait: Duration,
    #[serde(with = "millis", rename = "kill_wait_ms")]
    pub kill_wait: Duration,
    #[serde(with = "millis", rename = "exit_poll_interval_ms")]
    pub exit_poll_interval: Duration,
    #[serde(with = "millis", rename = "liveness_timeout_ms")]
    pub liveness_timeout: Duration,
    #[serde(with = "millis", rename = "broker_ping_timeout_ms")]
    pub broker_ping_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            steady_interval: MonitorConfig::STEADY_INTERVAL,
            partial_interval: MonitorConfig::PARTIAL_INTERVAL,
            cold_interval: MonitorConfig::COLD_INTERVAL,
            sleep_slice: MonitorConfig::SLEEP_SLICE,
            confirmation_ttl: MonitorConfig::CONFIRMATION_TTL,
            detailed_every_n_cycles: MonitorConfig::DETAILED_EVERY_N_CYCLES,
            settle_delay: SupervisorConfig::SETTLE_DELAY,
            broker_confirm_attempts: SupervisorConfig::BROKER_CONFIRM_ATTEMPTS,
            broker_confirm_backoff: SupervisorConfig::BROKER_CONFIRM_BACKOFF,
            terminate_wait: SupervisorConfig::TERMINATE_WAIT,
            kill_wait: SupervisorConfig::KILL_WAIT,
            exit_poll_interval: SupervisorConfig::EXIT_POLL_INTERVAL,
            liveness_timeout: ProbeConfig::LIVENESS_TIMEOUT,
            broker_ping_timeout: BrokerConfig::PING_TIMEOUT,
        }
    }
}

/// Per-service overrides from the config file. Unset fields keep defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub display_name: Option<String>,
    pub port: Option<u16>,
    pub dir: Option<PathBuf>,
    pub script: Option<String>,
    pub probe_timeout_ms: Option<u64>,
    pub busy_tolerant: Option<bool>,
    /// Replaces the default per-service environment overrides when set.
    pub env: Option<BTreeMap<String, String>>,
}

/// Broker overrides from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub executable: Option<PathBuf>,
    pub port: Option<u16>,
    pub process_name: Option<String>,
    pub endpoints: Option<Vec<BrokerEndpoint>>,
    pub fallback_ports: Option<Vec<u16>>,
}

/// Top-level conductor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Program directory: holds the broker and the overrides file.
    pub base_dir: PathBuf,
    /// Parent of the per-service working directories.
    pub services_dir: Option<PathBuf>,
    /// Where per-service diagnostic logs are written.
    pub log_dir: Option<PathBuf>,
    /// Environment overrides file.
    pub env_file: Option<PathBuf>,
    pub broker: BrokerSettings,
    pub services: BTreeMap<ServiceId, ServiceSettings>,
    pub timings: Timings,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self::with_base_dir(platform::default_base_dir())
    }
}

impl ConductorConfig {
    /// Defaults rooted at `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            services_dir: None,
            log_dir: None,
            env_file: None,
            broker: BrokerSettings::default(),
            services: BTreeMap::new(),
            timings: Timings::default(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// A missing file yields defaults rooted at the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let base_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(platform::default_base_dir);
            info!(
                "No config at {}, using defaults rooted at {}",
                path.display(),
                base_dir.display()
            );
            return Ok(Self::with_base_dir(base_dir));
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ConductorError::io_with_path(e, path))?;
        let config: ConductorConfig =
            serde_json::from_str(&contents).map_err(|e| ConductorError::Config {
                message: format!("Invalid config {}: {}", path.display(), e),
            })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn services_dir(&self) -> PathBuf {
        self.services_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join(AppConfig::SERVICES_DIR_NAME))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.base_dir.clone())
    }

    pub fn env_file(&self) -> PathBuf {
        self.env_file
            .clone()
            .unwrap_or_else(|| self.base_dir.join(AppConfig::ENV_FILE_NAME))
    }

    /// Resolve the immutable descriptor for every service.
    pub fn descriptors(&self) -> ServiceMap<ServiceDescriptor> {
        let services_dir = self.services_dir();
        ServiceMap::from_fn(|id| {
            let settings = self.services.get(&id).cloned().unwrap_or_default();
            let working_dir = settings
                .dir
                .unwrap_or_else(|| services_dir.join(id.as_str()));
            let script = working_dir.join(
                settings
                    .script
                    .unwrap_or_else(|| id.default_script().to_string()),
            );

            let defaults = id.default_policy();
            let policy = ServicePolicy {
                probe_timeout: settings
                    .probe_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.probe_timeout),
                busy_tolerant: settings.busy_tolerant.unwrap_or(defaults.busy_tolerant),
                env_overrides: settings.env.unwrap_or(defaults.env_overrides),
            };

            ServiceDescriptor {
                id,
                display_name: settings
                    .display_name
                    .unwrap_or_else(|| id.default_display_name().to_string()),
                port: settings.port.unwrap_or_else(|| id.default_port()),
                interpreter: platform::venv_python(&working_dir),
                working_dir,
                script,
                policy,
            }
        })
    }

    /// Resolve the broker descriptor.
    pub fn broker_descriptor(&self) -> BrokerDescriptor {
        let working_dir = self.base_dir.join(BrokerConfig::DIR_NAME);
        let process_name = self
            .broker
            .process_name
            .clone()
            .unwrap_or_else(|| BrokerConfig::PROCESS_NAME.to_string());
        let executable = self
            .broker
            .executable
            .clone()
            .unwrap_or_else(|| working_dir.join(platform::executable_name(&process_name)));
        let port = self.broker.port.unwrap_or(BrokerConfig::DEFAULT_PORT);

        BrokerDescriptor {
            display_name: BrokerConfig::DISPLAY_NAME.to_string(),
            working_dir: executable
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or(working_dir),
            executable,
            port,
            process_name,
            endpoints: self
                .broker
                .endpoints
                .clone()
                .unwrap_or_else(|| BrokerEndpoint::defaults_for(port)),
            fallback_ports: self
                .broker
                .fallback_ports
                .clone()
                .unwrap_or_else(|| {
                    let mut ports = vec![port];
                    if port != BrokerConfig::ALT_PORT {
                        ports.push(BrokerConfig::ALT_PORT);
                    }
                    ports
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_intervals_are_tiered() {
        assert!(MonitorConfig::STEADY_INTERVAL > MonitorConfig::PARTIAL_INTERVAL);
        assert!(MonitorConfig::PARTIAL_INTERVAL > MonitorConfig::COLD_INTERVAL);
        assert!(MonitorConfig::SLEEP_SLICE < MonitorConfig::COLD_INTERVAL);
    }

    #[test]
    fn test_default_descriptors() {
        let config = ConductorConfig::with_base_dir("/opt/conductor");
        let descriptors = config.descriptors();

        let gary = &descriptors[ServiceId::Gary];
        assert_eq!(gary.port, 8000);
        assert_eq!(gary.display_name, "gary main");
        assert!(gary.script.ends_with("g4l_localhost.py"));
        assert!(gary
            .working_dir
            .starts_with(Path::new("/opt/conductor").join("services")));
        assert!(gary.interpreter.starts_with(&gary.working_dir));
        assert!(gary.policy.busy_tolerant);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ConductorConfig::load(&temp_dir.path().join("conductor.json")).unwrap();
        assert_eq!(config.base_dir, temp_dir.path());
        assert_eq!(config.timings, Timings::default());
    }

    #[test]
    fn test_load_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conductor.json");
        std::fs::write(
            &path,
            r#"{
                "base_dir": "/srv/app",
                "services": {
                    "stable-audio": { "port": 9005, "busy_tolerant": true },
                    "gary": { "probe_timeout_ms": 15000 }
                },
                "broker": { "port": 6390 },
                "timings": { "cold_interval_ms": 500 }
            }"#,
        )
        .unwrap();

        let config = ConductorConfig::load(&path).unwrap();
        let descriptors = config.descriptors();
        assert_eq!(descriptors[ServiceId::StableAudio].port, 9005);
        assert!(descriptors[ServiceId::StableAudio].policy.busy_tolerant);
        assert_eq!(
            descriptors[ServiceId::Gary].policy.probe_timeout,
            Duration::from_secs(15)
        );
        assert_eq!(config.timings.cold_interval, Duration::from_millis(500));
        assert_eq!(config.timings.steady_interval, MonitorConfig::STEADY_INTERVAL);

        let broker = config.broker_descriptor();
        assert_eq!(broker.port, 6390);
        assert_eq!(broker.fallback_ports, vec![6390, BrokerConfig::ALT_PORT]);
    }

    #[test]
    fn test_broker_endpoints_follow_configured_port() {
        let mut config = ConductorConfig::with_base_dir("/srv/app");
        config.broker.port = Some(6390);

        let broker = config.broker_descriptor();
        let ports: Vec<(&str, u16)> = broker
            .endpoints
            .iter()
            .map(|e| (e.host.as_str(), e.port))
            .collect();
        assert_eq!(
            ports,
            vec![
                ("localhost", 6390),
                ("127.0.0.1", 6390),
                ("localhost", BrokerConfig::ALT_PORT)
            ]
        );

        config.broker.port = None;
        let broker = config.broker_descriptor();
        assert_eq!(broker.endpoints[0].port, BrokerConfig::DEFAULT_PORT);
        assert_eq!(broker.endpoints[1].port, BrokerConfig::DEFAULT_PORT);
    }

    #[test]
    fn test_broker_on_alt_port_is_not_listed_twice() {
        let mut config = ConductorConfig::with_base_dir("/srv/app");
        config.broker.port = Some(BrokerConfig::ALT_PORT);

        let broker = config.broker_descriptor();
        assert_eq!(broker.endpoints.len(), 2);
        assert_eq!(broker.fallback_ports, vec![BrokerConfig::ALT_PORT]);
    }

    #[test]
    fn test_load_invalid_json_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conductor.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ConductorConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConductorError::Config { .. }));
    }
}
