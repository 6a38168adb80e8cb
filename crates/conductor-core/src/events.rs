//! Typed event channel between the background tasks and the control surface.
//!
//! Publishers never block: events go over a bounded broadcast channel and a
//! slow subscriber loses the oldest events rather than stalling the monitor.
//! The latest snapshot is also kept in a watch channel for polling readers.

use crate::config::EventConfig;
use crate::monitor::HealthSnapshot;
use crate::service::ServiceId;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Severity of a narration line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One operational narration line tagged with the component or service it
/// concerns.
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub scope: String,
    pub level: LogLevel,
    pub message: String,
    pub at: DateTime<Local>,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Which supervisor operation an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "service", rename_all = "snake_case")]
pub enum OperationKind {
    Start,
    Stop,
    Restart(ServiceId),
    StopOne(ServiceId),
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Start => write!(f, "start"),
            OperationKind::Stop => write!(f, "stop"),
            OperationKind::Restart(id) => write!(f, "restart {}", id),
            OperationKind::StopOne(id) => write!(f, "stop {}", id),
        }
    }
}

/// How a supervisor operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Every step ran. Individual services may still have been skipped.
    Completed,
    /// The sequence stopped early.
    Aborted { reason: String },
}

#[derive(Debug, Clone)]
pub enum Event {
    SnapshotPublished(Arc<HealthSnapshot>),
    LogLine(LogLine),
    OperationCompleted {
        kind: OperationKind,
        outcome: OperationOutcome,
    },
}

/// Cloneable publishing side of the event channel.
#[derive(Clone)]
pub struct EventBus {
    events: broadcast::Sender<Event>,
    snapshot: Arc<watch::Sender<Arc<HealthSnapshot>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EventConfig::CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (snapshot, _) = watch::channel(Arc::new(HealthSnapshot::empty()));
        Self {
            events,
            snapshot: Arc::new(snapshot),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<HealthSnapshot>> {
        self.snapshot.subscribe()
    }

    /// The most recently published snapshot.
    pub fn latest_snapshot(&self) -> Arc<HealthSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Replace the current snapshot and announce it.
    pub fn publish_snapshot(&self, snapshot: HealthSnapshot) {
        let snapshot = Arc::new(snapshot);
        self.snapshot.send_replace(snapshot.clone());
        self.send(Event::SnapshotPublished(snapshot));
    }

    pub fn operation_completed(&self, kind: OperationKind, outcome: OperationOutcome) {
        debug!("Operation {} finished: {:?}", kind, outcome);
        self.send(Event::OperationCompleted { kind, outcome });
    }

    pub fn debug(&self, scope: &str, message: impl Into<String>) {
        self.log(scope, LogLevel::Debug, message.into());
    }

    pub fn info(&self, scope: &str, message: impl Into<String>) {
        self.log(scope, LogLevel::Info, message.into());
    }

    pub fn warn(&self, scope: &str, message: impl Into<String>) {
        self.log(scope, LogLevel::Warn, message.into());
    }

    pub fn error(&self, scope: &str, message: impl Into<String>) {
        self.log(scope, LogLevel::Error, message.into());
    }

    fn log(&self, scope: &str, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => debug!(scope = %scope, "{}", message),
            LogLevel::Info => info!(scope = %scope, "{}", message),
            LogLevel::Warn => warn!(scope = %scope, "{}", message),
            LogLevel::Error => error!(scope = %scope, "{}", message),
        }
        self.send(Event::LogLine(LogLine {
            scope: scope.to_string(),
            level,
            message,
            at: Local::now(),
        }));
    }

    fn send(&self, event: Event) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceMap;

    #[test]
    fn test_log_line_display() {
        let line = LogLine {
            scope: "supervisor".into(),
            level: LogLevel::Info,
            message: "starting redis".into(),
            at: Local::now(),
        };
        let rendered = line.to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] starting redis"));
        assert_eq!(rendered.len(), "[HH:MM:SS] starting redis".len());
    }

    #[tokio::test]
    async fn test_subscriber_receives_log_lines() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.warn("gary main", "health check failed");

        match rx.recv().await.unwrap() {
            Event::LogLine(line) => {
                assert_eq!(line.scope, "gary main");
                assert_eq!(line.level, LogLevel::Warn);
                assert_eq!(line.message, "health check failed");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_snapshot_replaces_latest() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert!(!bus.latest_snapshot().broker);

        bus.publish_snapshot(HealthSnapshot::new(true, ServiceMap::from_fn(|_| true)));

        assert!(bus.latest_snapshot().broker);
        assert!(matches!(rx.recv().await.unwrap(), Event::SnapshotPublished(s) if s.broker));
    }

    #[test]
    fn test_send_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.info("monitor", "nobody listening");
        bus.operation_completed(OperationKind::Stop, OperationOutcome::Completed);
    }
}
