use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Whether the managed set has been asked to run.
///
/// The timestamp is when the current run was started and is carried through
/// `Starting`, `Running` and `Stopping` unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Stopped,
    Starting { since: DateTime<Local> },
    Running { since: DateTime<Local> },
    Stopping { since: DateTime<Local> },
}

impl Lifecycle {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Lifecycle::Stopped)
    }

    pub fn since(&self) -> Option<DateTime<Local>> {
        match self {
            Lifecycle::Stopped => None,
            Lifecycle::Starting { since }
            | Lifecycle::Running { since }
            | Lifecycle::Stopping { since } => Some(*since),
        }
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.since()
            .map(|since| (Local::now() - since).to_std().unwrap_or_default())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Stopped => "stopped",
            Lifecycle::Starting { .. } => "starting",
            Lifecycle::Running { .. } => "running",
            Lifecycle::Stopping { .. } => "stopping",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format an uptime as `HH:MM:SS`.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
