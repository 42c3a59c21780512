use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    pub total_mb: u64,
    pub used_mb: u64,
    pub avail_mb: u64,
}

pub fn memory_stats_mb() -> MemoryStats {
    let mut sys = System::new_with_specifics(RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()));
    sys.refresh_memory();
    // sysinfo returns in bytes for v0.37
    let total_mb = sys.total_memory() / (1024 * 1024);
    let avail_mb = sys.available_memory() / (1024 * 1024);
    let used_mb = total_mb.saturating_sub(avail_mb);
    MemoryStats { total_mb, used_mb, avail_mb }
}

/// Logs how long a pipeline stage took, together with a memory snapshot.
pub struct StageTimer {
    stage: &'static str,
    start: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        log::debug!("[{}] started", stage);
        Self { stage, start: Instant::now() }
    }

    pub fn finish(self, detail: impl std::fmt::Display) -> Duration {
        let took = self.start.elapsed();
        let mem = memory_stats_mb();
        log::info!("[{}] {} | took {:?} | Mem used: {} MB | Avail: {} MB", self.stage, detail, took, mem.used_mb, mem.avail_mb);
        took
    }
}
