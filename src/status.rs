//! Host stats for the status bar.

use std::time::{Duration, Instant};

use sysinfo::System;

/// Cpu/memory sampler. Refreshing sysinfo is not free, so samples are
/// rate-limited independently of the status bar's redraw cadence.
pub struct HostStats {
    system: System,
    last_refresh: Option<Instant>,
    pub cpu_pct: f32,
    pub mem_used: u64,
    pub mem_total: u64,
}

const MIN_INTERVAL: Duration = Duration::from_secs(1);

impl HostStats {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            last_refresh: None,
            cpu_pct: 0.0,
            mem_used: 0,
            mem_total: 0,
        }
    }

    pub fn refresh(&mut self, now: Instant) {
        if let Some(last) = self.last_refresh {
            if now.duration_since(last) < MIN_INTERVAL {
                return;
            }
        }
        self.last_refresh = Some(now);
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.cpu_pct = self.system.global_cpu_usage();
        self.mem_used = self.system.used_memory();
        self.mem_total = self.system.total_memory();
    }

    pub fn label(&self) -> String {
        let gib = 1024.0 * 1024.0 * 1024.0;
        format!(
            "cpu {:>3.0}% mem {:.1}/{:.1}G",
            self.cpu_pct,
            self.mem_used as f64 / gib,
            self.mem_total as f64 / gib,
        )
    }
}

impl Default for HostStats {
    fn default() -> Self {
        Self::new()
    }
}
