//! The closed set of managed services.
//!
//! Services are a fixed, statically enumerated set keyed by [`ServiceId`].
//! Per-service values live in a [`ServiceMap`], which always holds exactly one
//! entry per service in declaration order.

use crate::config::{BrokerConfig, ProbeConfig};
use crate::error::ConductorError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Identifier of a managed application worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServiceId {
    #[serde(rename = "gary")]
    Gary,
    #[serde(rename = "melodyflow")]
    MelodyFlow,
    #[serde(rename = "stable-audio")]
    StableAudio,
}

impl ServiceId {
    /// Number of managed services.
    pub const COUNT: usize = 3;

    /// All services in declaration (start) order.
    pub const ALL: [ServiceId; Self::COUNT] =
        [ServiceId::Gary, ServiceId::MelodyFlow, ServiceId::StableAudio];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::Gary => "gary",
            ServiceId::MelodyFlow => "melodyflow",
            ServiceId::StableAudio => "stable-audio",
        }
    }

    fn index(self) -> usize {
        match self {
            ServiceId::Gary => 0,
            ServiceId::MelodyFlow => 1,
            ServiceId::StableAudio => 2,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ServiceId::Gary => 8000,
            ServiceId::MelodyFlow => 8002,
            ServiceId::StableAudio => 8005,
        }
    }

    pub fn default_display_name(&self) -> &'static str {
        match self {
            ServiceId::Gary => "gary main",
            ServiceId::MelodyFlow => "terry (melodyflow)",
            ServiceId::StableAudio => "jerry (stable audio open small)",
        }
    }

    pub fn default_script(&self) -> &'static str {
        match self {
            ServiceId::Gary => "g4l_localhost.py",
            ServiceId::MelodyFlow => "localhost_melodyflow.py",
            ServiceId::StableAudio => "api.py",
        }
    }

    /// Default health policy for this service.
    ///
    /// `gary` runs long synchronous generation jobs, so it gets the extended
    /// probe timeout and the busy exemption. `melodyflow` needs two attention
    /// backends disabled to start.
    pub fn default_policy(&self) -> ServicePolicy {
        match self {
            ServiceId::Gary => ServicePolicy {
                probe_timeout: ProbeConfig::BUSY_HEALTH_TIMEOUT,
                busy_tolerant: true,
                env_overrides: BTreeMap::new(),
            },
            ServiceId::MelodyFlow => ServicePolicy {
                probe_timeout: ProbeConfig::DEFAULT_HEALTH_TIMEOUT,
                busy_tolerant: false,
                env_overrides: BTreeMap::from([
                    ("XFORMERS_DISABLED".to_string(), "1".to_string()),
                    ("FLASH_ATTENTION_DISABLED".to_string(), "1".to_string()),
                ]),
            },
            ServiceId::StableAudio => ServicePolicy::default(),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceId {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gary" => Ok(ServiceId::Gary),
            "melodyflow" | "terry" => Ok(ServiceId::MelodyFlow),
            "stable-audio" | "stable_audio" | "jerry" => Ok(ServiceId::StableAudio),
            _ => Err(ConductorError::UnknownService(s.to_string())),
        }
    }
}

/// One value per managed service, indexed by [`ServiceId`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceMap<T>([T; ServiceId::COUNT]);

impl<T> ServiceMap<T> {
    /// Build a map by evaluating `f` for every service in declaration order.
    pub fn from_fn(mut f: impl FnMut(ServiceId) -> T) -> Self {
        Self(ServiceId::ALL.map(|id| f(id)))
    }

    /// Iterate `(id, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (ServiceId, &T)> {
        ServiceId::ALL.into_iter().zip(self.0.iter())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    /// Derive a new map from this one.
    pub fn map<U>(&self, mut f: impl FnMut(ServiceId, &T) -> U) -> ServiceMap<U> {
        ServiceMap::from_fn(|id| f(id, &self[id]))
    }
}

impl<T> Index<ServiceId> for ServiceMap<T> {
    type Output = T;

    fn index(&self, id: ServiceId) -> &T {
        &self.0[id.index()]
    }
}

impl<T> IndexMut<ServiceId> for ServiceMap<T> {
    fn index_mut(&mut self, id: ServiceId) -> &mut T {
        &mut self.0[id.index()]
    }
}

impl<T: Serialize> Serialize for ServiceMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(ServiceId::COUNT))?;
        for (id, value) in self.iter() {
            map.serialize_entry(id.as_str(), value)?;
        }
        map.end()
    }
}

/// Health and launch policy for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePolicy {
    /// Timeout for the protocol (HTTP) health probe.
    pub probe_timeout: Duration,
    /// Treat a failed health probe on a listening port as "busy", not broken.
    pub busy_tolerant: bool,
    /// Environment variables layered above the overrides file.
    pub env_overrides: BTreeMap<String, String>,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            probe_timeout: ProbeConfig::DEFAULT_HEALTH_TIMEOUT,
            busy_tolerant: false,
            env_overrides: BTreeMap::new(),
        }
    }
}

/// Immutable description of one managed service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub display_name: String,
    pub port: u16,
    pub working_dir: PathBuf,
    /// Resolved interpreter (the service's venv python).
    pub interpreter: PathBuf,
    /// Entry-point script.
    pub script: PathBuf,
    pub policy: ServicePolicy,
}

/// Host/port/db combination tried by the broker client ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub db: u32,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16, db: u32) -> Self {
        Self {
            host: host.into(),
            port,
            db,
        }
    }

    /// The candidates tried when nothing else is configured, built around
    /// the broker's configured port.
    pub fn defaults_for(port: u16) -> Vec<BrokerEndpoint> {
        let mut endpoints = vec![
            BrokerEndpoint::new("localhost", port, 0),
            BrokerEndpoint::new("127.0.0.1", port, 0),
        ];
        if port != BrokerConfig::ALT_PORT {
            endpoints.push(BrokerEndpoint::new("localhost", BrokerConfig::ALT_PORT, 0));
        }
        endpoints
    }
}

/// Immutable description of the shared broker dependency.
#[derive(Debug, Clone)]
pub struct BrokerDescriptor {
    pub display_name: String,
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub port: u16,
    /// Executable name used by the stop-sequence backstop kill.
    pub process_name: String,
    /// Client-ping candidates, tried in order.
    pub endpoints: Vec<BrokerEndpoint>,
    /// Ports tried by the raw-socket PING fallback.
    pub fallback_ports: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_roundtrip() {
        for id in ServiceId::ALL {
            let parsed: ServiceId = id.as_str().parse().expect("Should parse");
            assert_eq!(id, parsed);
        }
        assert!("redis".parse::<ServiceId>().is_err());
    }

    #[test]
    fn test_default_ports_are_distinct() {
        assert_eq!(ServiceId::Gary.default_port(), 8000);
        assert_eq!(ServiceId::MelodyFlow.default_port(), 8002);
        assert_eq!(ServiceId::StableAudio.default_port(), 8005);
    }

    #[test]
    fn test_service_map_indexing_and_order() {
        let mut map = ServiceMap::from_fn(|id| id.default_port());
        map[ServiceId::MelodyFlow] = 9002;

        let ports: Vec<u16> = map.values().copied().collect();
        assert_eq!(ports, vec![8000, 9002, 8005]);

        let names: Vec<ServiceId> = map.iter().map(|(id, _)| id).collect();
        assert_eq!(names, ServiceId::ALL.to_vec());
    }

    #[test]
    fn test_service_map_serializes_as_object() {
        let map = ServiceMap::from_fn(|id| id == ServiceId::Gary);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["gary"], true);
        assert_eq!(json["melodyflow"], false);
        assert_eq!(json["stable-audio"], false);
    }

    #[test]
    fn test_default_policies() {
        let gary = ServiceId::Gary.default_policy();
        assert!(gary.busy_tolerant);
        assert!(gary.probe_timeout >= ProbeConfig::DEFAULT_HEALTH_TIMEOUT * 3);

        let terry = ServiceId::MelodyFlow.default_policy();
        assert!(!terry.busy_tolerant);
        assert_eq!(
            terry.env_overrides.get("XFORMERS_DISABLED"),
            Some(&"1".to_string())
        );
    }
}
