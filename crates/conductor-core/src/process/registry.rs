//! Process handle registry.
//!
//! Only the supervisor writes; the monitor and status readers take cheap
//! snapshots of the handles. A handle read here may belong to a process that
//! is being stopped concurrently, so readers must check `is_alive` rather
//! than trust presence alone.

use super::handle::ProcessHandle;
use crate::service::{ServiceId, ServiceMap};
use std::sync::{Arc, RwLock};

type Slot = Option<Arc<dyn ProcessHandle>>;

#[derive(Default)]
struct Slots {
    broker: Slot,
    services: ServiceMap<Slot>,
}

/// Handles of the processes launched by the supervisor.
#[derive(Default)]
pub struct ProcessRegistry {
    slots: RwLock<Slots>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Slots) -> T) -> T {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        f(&slots)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Slots) -> T) -> T {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        f(&mut slots)
    }

    /// Track a service handle, returning the one it replaces.
    pub fn register(&self, id: ServiceId, handle: Arc<dyn ProcessHandle>) -> Slot {
        self.write(|slots| slots.services[id].replace(handle))
    }

    pub fn get(&self, id: ServiceId) -> Slot {
        self.read(|slots| slots.services[id].clone())
    }

    pub fn remove(&self, id: ServiceId) -> Slot {
        self.write(|slots| slots.services[id].take())
    }

    /// Tracked service handles in declaration order.
    pub fn all(&self) -> Vec<(ServiceId, Arc<dyn ProcessHandle>)> {
        self.read(|slots| {
            slots
                .services
                .iter()
                .filter_map(|(id, slot)| slot.clone().map(|handle| (id, handle)))
                .collect()
        })
    }

    /// Point-in-time copy of every service slot.
    pub fn services(&self) -> ServiceMap<Slot> {
        self.read(|slots| slots.services.clone())
    }

    pub fn register_broker(&self, handle: Arc<dyn ProcessHandle>) -> Slot {
        self.write(|slots| slots.broker.replace(handle))
    }

    pub fn broker(&self) -> Slot {
        self.read(|slots| slots.broker.clone())
    }

    pub fn remove_broker(&self) -> Slot {
        self.write(|slots| slots.broker.take())
    }

    pub fn is_empty(&self) -> bool {
        self.read(|slots| slots.broker.is_none() && slots.services.values().all(Option::is_none))
    }

    pub fn service_count(&self) -> usize {
        self.read(|slots| slots.services.values().filter(|s| s.is_some()).count())
    }

}
