//! Bounded history of narration lines for `get_logs`.

use conductor_core::{Event, LogLine};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LogHistory {
    lines: Arc<Mutex<VecDeque<LogLine>>>,
    capacity: usize,
}

impl LogHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: LogLine) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The newest `limit` lines, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogLine> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feed every log line from the event channel into the history until
    /// the channel closes.
    pub fn collect_from(&self, mut rx: broadcast::Receiver<Event>) -> JoinHandle<()> {
        let history = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::LogLine(line)) => history.push(line),
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        debug!("Log history lagged, {} lines dropped", missed)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
