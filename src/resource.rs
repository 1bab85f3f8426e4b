//! System resource detection and scan tuning.
//!
//! Detects available RAM and CPU cores, then derives how many worker
//! threads a collection should use to fan chunk scans out. Stateless:
//! each call to `ResourceManager::auto_tune()` re-probes the system.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

// ── Constants ───────────────────────────────────────────────────────

const GB: u64 = 1024 * 1024 * 1024;

/// Upper bound on scan threads regardless of core count.
const MAX_SCAN_THREADS: usize = 8;

/// Memory pressure above which scans run single-threaded.
const HIGH_PRESSURE: f64 = 0.9;

// ── SystemResources ─────────────────────────────────────────────────

/// Snapshot of detected hardware resources.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total physical RAM in bytes.
    pub total_memory_bytes: u64,
    /// Available (re-usable) RAM in bytes.
    pub available_memory_bytes: u64,
    /// Logical CPU count.
    pub cpu_count: usize,
}

impl SystemResources {
    /// Probe the current system for RAM and CPU information.
    pub fn detect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_count,
        }
    }

    /// Memory pressure indicator (0.0 = no pressure, 1.0 = critical).
    ///
    /// Formula: `1.0 - (available / total)`.
    pub fn memory_pressure(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 1.0;
        }
        let ratio = self.available_memory_bytes as f64 / self.total_memory_bytes as f64;
        (1.0 - ratio).clamp(0.0, 1.0)
    }
}

// ── TuningProfile ───────────────────────────────────────────────────

/// Adaptive parameters computed from system resources.
#[derive(Debug, Clone)]
pub struct TuningProfile {
    /// Worker threads used for per-chunk filter scans and index population.
    pub scan_threads: usize,
    /// Memory pressure at detection time (0.0 = no pressure, 1.0 = critical).
    pub memory_pressure: f64,
}

impl TuningProfile {
    /// Compute a tuning profile from detected resources.
    ///
    /// Heuristics:
    /// - RAM < 4 GB or pressure > 0.9 -> 1 thread.
    /// - otherwise `clamp(cpu_count, 1, 8)`.
    pub fn from_resources(res: &SystemResources) -> Self {
        let pressure = res.memory_pressure();
        let scan_threads = if res.total_memory_bytes < 4 * GB || pressure > HIGH_PRESSURE {
            1
        } else {
            res.cpu_count.clamp(1, MAX_SCAN_THREADS)
        };

        Self {
            scan_threads,
            memory_pressure: pressure,
        }
    }
}

impl Default for TuningProfile {
    /// Conservative defaults suitable for tests and unknown environments.
    fn default() -> Self {
        Self {
            scan_threads: 1,
            memory_pressure: 0.0,
        }
    }
}

// ── ResourceManager ─────────────────────────────────────────────────

/// Stateless utility: detect system resources and compute tuning profile.
pub struct ResourceManager;

impl ResourceManager {
    /// Probe the system and return an adaptive tuning profile.
    pub fn auto_tune() -> TuningProfile {
        let resources = SystemResources::detect();
        TuningProfile::from_resources(&resources)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
