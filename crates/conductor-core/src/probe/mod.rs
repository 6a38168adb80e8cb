//! Network probes used by the health monitor and the supervisor.
//!
//! Three tiers, cheapest first: a TCP connect to the service port, an HTTP
//! GET on its health path, and a PING against the broker.

pub mod broker;
pub mod http;
pub mod liveness;

pub use http::{HealthCheck, ProbeFailure};

use crate::config::{ProbeConfig, Timings};
use crate::error::{ConductorError, Result};
use crate::service::{BrokerDescriptor, BrokerEndpoint};
use async_trait::async_trait;
use std::time::Duration;

/// Probe capability consumed by the monitor, the supervisor, and status
/// derivation. Probes never fail: every error maps to "not healthy".
#[async_trait]
pub trait Probes: Send + Sync {
    /// Whether anything is accepting connections on the local port.
    async fn port_listening(&self, port: u16) -> bool;

    /// One HTTP health request against the local port.
    async fn health(&self, port: u16, timeout: Duration) -> HealthCheck;

    /// Whether the broker answers PING on any known path.
    async fn broker(&self) -> bool;
}

/// Probes that talk to the real network.
pub struct NetworkProbes {
    client: reqwest::Client,
    host: String,
    liveness_timeout: Duration,
    broker_timeout: Duration,
    broker_endpoints: Vec<BrokerEndpoint>,
    broker_fallback_ports: Vec<u16>,
}

impl NetworkProbes {
    pub fn new(broker: &BrokerDescriptor, timings: &Timings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("conductor/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .map_err(|e| ConductorError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            host: ProbeConfig::LOCAL_HOST.to_string(),
            liveness_timeout: timings.liveness_timeout,
            broker_timeout: timings.broker_ping_timeout,
            broker_endpoints: broker.endpoints.clone(),
            broker_fallback_ports: broker.fallback_ports.clone(),
        })
    }
}

#[async_trait]
impl Probes for NetworkProbes {
    async fn port_listening(&self, port: u16) -> bool {
        liveness::probe_port(&self.host, port, self.liveness_timeout).await
    }

    async fn health(&self, port: u16, timeout: Duration) -> HealthCheck {
        http::probe_health(&self.client, &self.host, port, timeout).await
    }

    async fn broker(&self) -> bool {
        if broker::client_ping(&self.broker_endpoints, self.broker_timeout).await {
            return true;
        }
        broker::raw_ping(&self.host, &self.broker_fallback_ports, self.broker_timeout).await
    }
}
