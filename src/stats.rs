//! Process-wide diagnostics counters.
//!
//! Relaxed atomic counters updated from the hub allocation and release
//! paths. These are observability aids, not part of the ownership
//! contract: readers get a point-in-time snapshot and concurrent updates
//! may be mid-flight while it is taken.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter storage. One static instance for the whole process.
struct HubStats {
    /// Hubs created (separate and combined).
    hubs_allocated: AtomicU64,
    /// Hubs whose storage has been released.
    hubs_released: AtomicU64,
    /// Hubs created via the combined-allocation fast path.
    combined_blocks: AtomicU64,
    /// Managed objects destroyed (array elements counted individually).
    objects_destroyed: AtomicU64,
    /// Weak upgrades that observed a dead hub.
    failed_upgrades: AtomicU64,
}

impl HubStats {
    const fn new() -> Self {
        Self {
            hubs_allocated: AtomicU64::new(0),
            hubs_released: AtomicU64::new(0),
            combined_blocks: AtomicU64::new(0),
            objects_destroyed: AtomicU64::new(0),
            failed_upgrades: AtomicU64::new(0),
        }
    }
}

static STATS: HubStats = HubStats::new();

/// Point-in-time copy of the diagnostics counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total hubs created since process start.
    pub hubs_allocated: u64,
    /// Total hubs whose storage has been released.
    pub hubs_released: u64,
    /// Hubs currently live (allocated minus released).
    pub live_hubs: u64,
    /// Hubs created via the combined-allocation fast path.
    pub combined_blocks: u64,
    /// Managed objects destroyed, counting array elements individually.
    pub objects_destroyed: u64,
    /// Weak upgrades that failed because the object was already dead.
    pub failed_upgrades: u64,
}

/// Take a snapshot of the diagnostics counters.
pub fn stats() -> StatsSnapshot {
    let hubs_allocated = STATS.hubs_allocated.load(Ordering::Relaxed);
    let hubs_released = STATS.hubs_released.load(Ordering::Relaxed);
    StatsSnapshot {
        hubs_allocated,
        hubs_released,
        live_hubs: hubs_allocated.saturating_sub(hubs_released),
        combined_blocks: STATS.combined_blocks.load(Ordering::Relaxed),
        objects_destroyed: STATS.objects_destroyed.load(Ordering::Relaxed),
        failed_upgrades: STATS.failed_upgrades.load(Ordering::Relaxed),
    }
}

pub(crate) fn record_hub_allocated(combined: bool) {
    STATS.hubs_allocated.fetch_add(1, Ordering::Relaxed);
    if combined {
        STATS.combined_blocks.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn record_hub_released() {
    STATS.hubs_released.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_destroyed(count: usize) {
    STATS.objects_destroyed.fetch_add(count as u64, Ordering::Relaxed);
}

pub(crate) fn record_failed_upgrade() {
    STATS.failed_upgrades.fetch_add(1, Ordering::Relaxed);
}
