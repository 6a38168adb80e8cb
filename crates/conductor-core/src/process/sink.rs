//! Per-process diagnostic output files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Locates the captured output of each launched process:
/// `{log_dir}/{name}_debug.log`.
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    log_dir: PathBuf,
}

impl DiagnosticSink {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}_debug.log", name))
    }

    /// First `n` non-empty lines of captured output. Empty when nothing was
    /// captured or the file is unreadable.
    pub fn head(&self, name: &str, n: usize) -> Vec<String> {
        let Ok(file) = File::open(self.path_for(name)) else {
            return Vec::new();
        };

        BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.trim().is_empty())
            .take(n)
            .collect()
    }
}
