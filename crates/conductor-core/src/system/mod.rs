//! Host resource sampling for the control surface.
//!
//! - `gpu` - First-GPU utilization and VRAM through `nvidia-smi`
//! - `resources` - CPU and RAM through `sysinfo`, combined with the GPU reading

mod gpu;
mod resources;

pub use gpu::{detect_gpu_monitor, parse_gpu_line, GpuInfo, GpuMonitor, NoGpu, NvidiaSmiMonitor};
pub use resources::{ResourceTracker, SystemStats};
