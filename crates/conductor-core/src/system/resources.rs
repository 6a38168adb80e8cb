//! CPU, RAM and GPU sampling.

use super::gpu::{detect_gpu_monitor, GpuInfo, GpuMonitor};
use crate::config::SystemConfig;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::System;

const GIB: u64 = 1024 * 1024 * 1024;

/// One host reading. Any field the host could not provide is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStats {
    /// CPU usage percentage across all cores.
    pub cpu: Option<f32>,
    pub memory_percent: Option<f32>,
    /// Whole GiB.
    pub memory_used: Option<u64>,
    /// Whole GiB.
    pub memory_total: Option<u64>,
    pub gpu_util: Option<f32>,
    /// MiB.
    pub vram_used: Option<u64>,
    /// MiB.
    pub vram_total: Option<u64>,
}

impl SystemStats {
    /// Every field empty; reported when sampling itself failed.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Combine raw readings. Memory figures are in bytes.
    pub fn from_readings(
        cpu: f32,
        memory_used: u64,
        memory_total: u64,
        gpu: Option<&GpuInfo>,
    ) -> Self {
        let has_memory = memory_total > 0;
        Self {
            cpu: Some(cpu),
            memory_percent: has_memory
                .then(|| (memory_used as f64 / memory_total as f64 * 100.0) as f32),
            memory_used: has_memory.then_some(memory_used / GIB),
            memory_total: has_memory.then_some(memory_total / GIB),
            gpu_util: gpu.map(|g| g.usage),
            vram_used: gpu.map(|g| g.memory_used_mb),
            vram_total: gpu.map(|g| g.memory_total_mb),
        }
    }
}

struct Sampler {
    system: System,
    gpu: Arc<dyn GpuMonitor>,
    last: Option<(SystemStats, Instant)>,
}

/// Samples host resources, reusing a reading younger than
/// [`SystemConfig::SAMPLE_TTL`].
///
/// Construction does no I/O; the system handle and (unless one was supplied)
/// the GPU monitor are created on the first sample. Sampling blocks, so async
/// callers go through `spawn_blocking`.
pub struct ResourceTracker {
    gpu_override: Option<Arc<dyn GpuMonitor>>,
    sampler: Mutex<Option<Sampler>>,
}

impl ResourceTracker {
    pub fn new(gpu: Option<Arc<dyn GpuMonitor>>) -> Self {
        Self {
            gpu_override: gpu,
            sampler: Mutex::new(None),
        }
    }

    pub fn sample(&self) -> SystemStats {
        let mut slot = self.sampler.lock().unwrap_or_else(|e| e.into_inner());
        let sampler = slot.get_or_insert_with(|| {
            let mut system = System::new();
            // CPU usage is a delta; prime it so the first real sample has a baseline.
            system.refresh_cpu_usage();
            Sampler {
                system,
                gpu: self
                    .gpu_override
                    .clone()
                    .unwrap_or_else(detect_gpu_monitor),
                last: None,
            }
        });

        if let Some((stats, at)) = &sampler.last {
            if at.elapsed() < SystemConfig::SAMPLE_TTL {
                return stats.clone();
            }
        }

        sampler.system.refresh_cpu_usage();
        sampler.system.refresh_memory();
        let gpu = sampler.gpu.gpu_info();
        let stats = SystemStats::from_readings(
            sampler.system.global_cpu_usage(),
            sampler.system.used_memory(),
            sampler.system.total_memory(),
            gpu.as_ref(),
        );
        sampler.last = Some((stats.clone(), Instant::now()));
        stats
    }
}
