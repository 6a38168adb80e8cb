use crate::service::{ServiceId, ServiceMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// When each service last passed a full health probe.
///
/// Entries older than the freshness window read as absent. Only the health
/// monitor mutates this; readers may query it from any task.
#[derive(Debug)]
pub struct ConfirmedRegistry {
    ttl: Duration,
    confirmed_at: Mutex<ServiceMap<Option<Instant>>>,
}

impl ConfirmedRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            confirmed_at: Mutex::new(ServiceMap::from_fn(|_| None)),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut ServiceMap<Option<Instant>>) -> T) -> T {
        let mut map = self.confirmed_at.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut map)
    }

    /// Record a successful full probe now. Returns `true` if the service had
    /// no entry before.
    pub fn confirm(&self, id: ServiceId) -> bool {
        self.with(|map| map[id].replace(Instant::now()).is_none())
    }

    /// Drop the entry. Returns `true` if there was one, fresh or not.
    pub fn revoke(&self, id: ServiceId) -> bool {
        self.with(|map| map[id].take().is_some())
    }

    /// Whether the service passed a full probe within the freshness window.
    pub fn is_fresh(&self, id: ServiceId) -> bool {
        let ttl = self.ttl;
        self.with(|map| map[id].is_some_and(|at| at.elapsed() < ttl))
    }

    pub fn fresh_count(&self) -> usize {
        ServiceId::ALL.iter().filter(|id| self.is_fresh(**id)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let registry = ConfirmedRegistry::new(Duration::from_secs(300));
        assert!(registry.confirm(ServiceId::Gary));
        assert!(registry.is_fresh(ServiceId::Gary));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!registry.is_fresh(ServiceId::Gary));
        assert_eq!(registry.fresh_count(), 0);

        // A stale entry still counts as "had one" for revocation and refresh.
        assert!(!registry.confirm(ServiceId::Gary));
        assert!(registry.is_fresh(ServiceId::Gary));
    }

    #[test]
    fn test_revoke() {
        let registry = ConfirmedRegistry::new(Duration::from_secs(300));
        assert!(!registry.revoke(ServiceId::StableAudio));
        registry.confirm(ServiceId::StableAudio);
        assert!(registry.revoke(ServiceId::StableAudio));
        assert!(!registry.is_fresh(ServiceId::StableAudio));
    }
}
