//! Child-process environment composition.
//!
//! Layers, lowest precedence first: the inherited process environment, the
//! optional overrides file, per-service overrides, then the fixed encoding
//! variables every Python worker needs to print non-ASCII output.

use crate::error::{ConductorError, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, warn};

/// Encoding variables applied last, after every other layer.
pub const ENCODING_OVERRIDES: [(&str, &str); 2] = [
    ("PYTHONIOENCODING", "utf-8"),
    ("PYTHONLEGACYWINDOWSSTDIO", "1"),
];

/// Key/value pairs read from a dotenv-style overrides file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    /// Load the overlay file. A missing file is an empty overlay.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No environment overrides file at {}", path.display());
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConductorError::io_with_path(e, path))?;
        Ok(Self::parse(&contents))
    }

    /// Parse dotenv syntax: `KEY=value`, `export KEY=value`, `#` comments,
    /// and single- or double-quoted values. Malformed lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut vars = BTreeMap::new();

        for (line_no, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

            let Some((key, value)) = line.split_once('=') else {
                warn!("Ignoring malformed env line {}: {}", line_no + 1, line);
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            vars.insert(key.to_string(), unquote(value.trim()));
        }

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    // Unquoted values may carry a trailing comment.
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Split inherited variables into the UTF-8 pairs a child can receive and
/// the (lossily rendered) names of those that had to be left out.
pub fn utf8_vars<I>(vars: I) -> (Vec<(String, String)>, Vec<String>)
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut kept = Vec::new();
    let mut skipped = Vec::new();
    for (key, value) in vars {
        match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => kept.push((key, value)),
            (Ok(key), Err(_)) => skipped.push(key),
            (Err(key), _) => skipped.push(key.to_string_lossy().into_owned()),
        }
    }
    (kept, skipped)
}

/// Build the complete environment for one child process.
pub fn compose_env<I>(
    inherited: I,
    overlay: &EnvOverlay,
    service_overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = inherited.into_iter().collect();

    for (key, value) in overlay.iter() {
        env.insert(key.to_string(), value.to_string());
    }
    for (key, value) in service_overrides {
        env.insert(key.clone(), value.clone());
    }
    for (key, value) in ENCODING_OVERRIDES {
        env.insert(key.to_string(), value.to_string());
    }

    env
}
