use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use sysinfo::{Disks, Networks, System};

/// A point-in-time reading of host resource counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Average CPU usage across all cores (0-100)
    pub cpu_pct: f64,
    /// Memory usage percentage (0-100)
    pub mem_pct: f64,
    /// Disk usage percentage across all mounted disks (0-100)
    pub disk_pct: f64,
    /// GPU memory usage percentage, when a GPU probe is installed
    pub gpu_mem_pct: Option<f64>,
    /// GPU utilization percentage, when a GPU probe is installed
    pub gpu_util_pct: Option<f64>,
    /// Cumulative bytes sent over all network interfaces
    pub net_bytes_sent: u64,
    /// Cumulative bytes received over all network interfaces
    pub net_bytes_recv: u64,
}

/// A single GPU reading.
#[derive(Debug, Clone, Copy)]
pub struct GpuSample {
    pub memory_pct: f64,
    pub utilization_pct: f64,
}

/// Capability interface for GPU counters.
///
/// GPU support is optional; hosts without one use [`NoGpuProbe`] and the
/// snapshot carries `None` for the GPU fields.
pub trait GpuProbe: Send + Sync {
    fn sample(&self) -> Option<GpuSample>;
}

/// GPU probe for hosts without a usable GPU.
pub struct NoGpuProbe;

impl GpuProbe for NoGpuProbe {
    fn sample(&self) -> Option<GpuSample> {
        None
    }
}

struct SamplerState {
    system: System,
    disks: Disks,
    networks: Networks,
}

/// Reads host resource counters on demand.
///
/// The sysinfo handles are retained between calls so CPU usage reflects the
/// delta since the previous sample; the first snapshot after construction
/// reports zero CPU. Safe to call from any thread; the internal lock is held
/// only while counters are refreshed.
pub struct SystemSampler {
    state: Mutex<SamplerState>,
    gpu: Box<dyn GpuProbe>,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_gpu_probe(Box::new(NoGpuProbe))
    }

    pub fn with_gpu_probe(gpu: Box<dyn GpuProbe>) -> Self {
        Self {
            state: Mutex::new(SamplerState {
                system: System::new_all(),
                disks: Disks::new_with_refreshed_list(),
                networks: Networks::new_with_refreshed_list(),
            }),
            gpu,
        }
    }

    /// Take a snapshot of the host counters.
    ///
    /// Counters that cannot be read contribute zero (or `None` for GPU
    /// fields) instead of failing the whole call.
    pub fn sample(&self) -> SystemSnapshot {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.system.refresh_all();
        state.disks.refresh();
        state.networks.refresh();

        let cpus = state.system.cpus();
        let cpu_pct = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() as f64 / cpus.len() as f64
        };

        let total_memory = state.system.total_memory() as f64;
        let mem_pct = if total_memory > 0.0 {
            state.system.used_memory() as f64 / total_memory * 100.0
        } else {
            0.0
        };

        let mut disk_total: u64 = 0;
        let mut disk_available: u64 = 0;
        for disk in state.disks.list() {
            disk_total = disk_total.saturating_add(disk.total_space());
            disk_available = disk_available.saturating_add(disk.available_space());
        }
        let disk_pct = if disk_total > 0 {
            (disk_total - disk_available) as f64 / disk_total as f64 * 100.0
        } else {
            0.0
        };

        let mut net_bytes_sent: u64 = 0;
        let mut net_bytes_recv: u64 = 0;
        for (_name, data) in &state.networks {
            net_bytes_sent = net_bytes_sent.saturating_add(data.total_transmitted());
            net_bytes_recv = net_bytes_recv.saturating_add(data.total_received());
        }

        let gpu = self.gpu.sample();

        SystemSnapshot {
            timestamp: Utc::now(),
            cpu_pct,
            mem_pct,
            disk_pct,
            gpu_mem_pct: gpu.map(|g| g.memory_pct),
            gpu_util_pct: gpu.map(|g| g.utilization_pct),
            net_bytes_sent,
            net_bytes_recv,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}
