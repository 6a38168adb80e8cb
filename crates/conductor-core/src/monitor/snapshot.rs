use crate::service::{ServiceId, ServiceMap};
use chrono::{DateTime, Local};
use serde::Serialize;

/// Health of every service at the end of one monitor cycle.
///
/// Published whole; never patched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub broker: bool,
    pub services: ServiceMap<bool>,
    pub at: DateTime<Local>,
    /// Monitor cycle that produced this snapshot. Zero before the first one.
    pub cycle: u64,
}

impl HealthSnapshot {
    pub fn new(broker: bool, services: ServiceMap<bool>) -> Self {
        Self {
            broker,
            services,
            at: Local::now(),
            cycle: 0,
        }
    }

    /// The placeholder held before the monitor publishes anything.
    pub fn empty() -> Self {
        Self::new(false, ServiceMap::from_fn(|_| false))
    }

    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn is_healthy(&self, id: ServiceId) -> bool {
        self.services[id]
    }

    pub fn healthy_count(&self) -> usize {
        self.services.values().filter(|healthy| **healthy).count()
    }

    pub fn all_healthy(&self) -> bool {
        self.services.values().all(|healthy| *healthy)
    }

    pub fn any_healthy(&self) -> bool {
        self.services.values().any(|healthy| *healthy)
    }
}
