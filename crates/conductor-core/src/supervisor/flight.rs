//! Single-flight slot shared by every supervisor operation.

use crate::events::OperationKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct FlightSlot {
    current: watch::Sender<Option<OperationKind>>,
}

impl FlightSlot {
    pub(crate) fn new() -> Arc<Self> {
        let (current, _) = watch::channel(None);
        Arc::new(Self { current })
    }

    /// Claim the slot, or `None` if another operation holds it.
    pub(crate) fn try_acquire(self: &Arc<Self>, kind: OperationKind) -> Option<FlightGuard> {
        let acquired = self.current.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(kind);
            true
        });
        acquired.then(|| FlightGuard { slot: self.clone() })
    }

    pub(crate) fn current(&self) -> Option<OperationKind> {
        *self.current.borrow()
    }

    /// Wait until no operation holds the slot. Returns `false` on timeout.
    pub(crate) async fn wait_idle(&self, limit: Duration) -> bool {
        let mut rx = self.current.subscribe();
        let idle = matches!(
            tokio::time::timeout(limit, rx.wait_for(Option::is_none)).await,
            Ok(Ok(_))
        );
        idle
    }
}

/// Releases the slot when dropped, including on panic.
#[derive(Debug)]
pub(crate) struct FlightGuard {
    slot: Arc<FlightSlot>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.slot.current.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_until_release() {
        let slot = FlightSlot::new();
        let guard = slot.try_acquire(OperationKind::Start).unwrap();
        assert_eq!(slot.current(), Some(OperationKind::Start));
        assert!(slot.try_acquire(OperationKind::Stop).is_none());

        drop(guard);
        assert_eq!(slot.current(), None);
        assert!(slot.try_acquire(OperationKind::Stop).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle() {
        let slot = FlightSlot::new();
        assert!(slot.wait_idle(Duration::from_millis(10)).await);

        let guard = slot.try_acquire(OperationKind::Start).unwrap();
        assert!(!slot.wait_idle(Duration::from_secs(1)).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(guard);
        });
        assert!(slot.wait_idle(Duration::from_secs(10)).await);
    }
}
