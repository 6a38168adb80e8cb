//! GPU utilization via `nvidia-smi`.
//!
//! Only the first device is reported. Machines without the tool get
//! [`NoGpu`], and every GPU field in the stats stays empty.

use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// One reading of the first GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuInfo {
    /// Utilization percentage (0-100).
    pub usage: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub name: Option<String>,
}

/// Source of GPU readings.
pub trait GpuMonitor: Send + Sync {
    fn is_available(&self) -> bool;

    /// Current reading, or `None` if the query failed.
    fn gpu_info(&self) -> Option<GpuInfo>;
}

/// Parse one `nvidia-smi --format=csv,noheader,nounits` line of
/// `utilization.gpu,memory.used,memory.total,name`.
pub fn parse_gpu_line(line: &str) -> Option<GpuInfo> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }
    Some(GpuInfo {
        usage: parts[0].parse().ok()?,
        memory_used_mb: parts[1].parse().ok()?,
        memory_total_mb: parts[2].parse().ok()?,
        name: parts
            .get(3)
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string()),
    })
}

/// NVIDIA GPU monitor using nvidia-smi.
pub struct NvidiaSmiMonitor;

impl NvidiaSmiMonitor {
    /// `Some` if `nvidia-smi` runs on this machine.
    pub fn detect() -> Option<Self> {
        let available = Command::new("nvidia-smi")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);

        if available {
            Some(Self)
        } else {
            debug!("nvidia-smi not available - GPU stats disabled");
            None
        }
    }
}

impl GpuMonitor for NvidiaSmiMonitor {
    fn is_available(&self) -> bool {
        true
    }

    fn gpu_info(&self) -> Option<GpuInfo> {
        let output = Command::new("nvidia-smi")
            .args([
                "--id=0",
                "--query-gpu=utilization.gpu,memory.used,memory.total,name",
                "--format=csv,noheader,nounits",
            ])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let line = stdout.lines().next().unwrap_or("");
                let info = parse_gpu_line(line);
                if info.is_none() {
                    debug!("Unexpected nvidia-smi output format: {}", line);
                }
                info
            }
            Ok(output) => {
                debug!(
                    "nvidia-smi returned non-zero: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
                None
            }
            Err(e) => {
                debug!("Failed to run nvidia-smi: {}", e);
                None
            }
        }
    }
}

/// Monitor for machines without a supported GPU.
pub struct NoGpu;

impl GpuMonitor for NoGpu {
    fn is_available(&self) -> bool {
        false
    }

    fn gpu_info(&self) -> Option<GpuInfo> {
        None
    }
}

/// The best monitor for this machine.
pub fn detect_gpu_monitor() -> Arc<dyn GpuMonitor> {
    match NvidiaSmiMonitor::detect() {
        Some(monitor) => Arc::new(monitor),
        None => Arc::new(NoGpu),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gpu_line() {
        let info = parse_gpu_line("37, 5120, 24576, NVIDIA GeForce RTX 4090").unwrap();
        assert_eq!(info.usage, 37.0);
        assert_eq!(info.memory_used_mb, 5120);
        assert_eq!(info.memory_total_mb, 24576);
        assert_eq!(info.name.as_deref(), Some("NVIDIA GeForce RTX 4090"));

        assert!(parse_gpu_line("[N/A], 0, 0").is_none());
        assert!(parse_gpu_line("").is_none());
    }

    #[test]
    fn test_no_gpu() {
        assert!(!NoGpu.is_available());
        assert!(NoGpu.gpu_info().is_none());
    }

    #[test]
    fn test_detect_does_not_panic() {
        let monitor = detect_gpu_monitor();
        if !monitor.is_available() {
            assert!(monitor.gpu_info().is_none());
        }
    }
}
