//! Host CPU and memory sampling
//!
//! A single `sysinfo::System` is kept for the lifetime of the sampler so
//! CPU usage is measured against the previous refresh.

use crate::models::HostMetrics;
use chrono::Utc;
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Memory figures in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryUsage {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Mean of per-core usage; 0 when no cores are reported
pub fn average_cpu(per_core: &[f32]) -> f64 {
    if per_core.is_empty() {
        return 0.0;
    }
    let sum: f64 = per_core.iter().map(|usage| f64::from(*usage)).sum();
    (sum / per_core.len() as f64).clamp(0.0, 100.0)
}

/// Build the partial host update pushed to the central API
pub fn host_metrics(cpu_percent: f64, memory: MemoryUsage) -> HostMetrics {
    HostMetrics {
        cpu_percent,
        memory_bytes: memory.used_bytes(),
        memory_percent: memory.percent(),
        timestamp: Utc::now(),
    }
}

pub struct HostSampler {
    system: System,
    primed: bool,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            primed: false,
        }
    }

    /// Take one sample. CPU usage covers the time since the previous call;
    /// the first call waits one minimum update interval to get a baseline.
    pub async fn sample(&mut self) -> HostMetrics {
        if !self.primed {
            self.system.refresh_cpu();
            tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
            self.primed = true;
        }
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let per_core: Vec<f32> = self.system.cpus().iter().map(|cpu| cpu.cpu_usage()).collect();
        let memory = MemoryUsage {
            total_bytes: self.system.total_memory(),
            available_bytes: self.system.available_memory(),
        };

        host_metrics(average_cpu(&per_core), memory)
    }
}
