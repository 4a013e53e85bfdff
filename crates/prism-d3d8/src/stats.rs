//! Device telemetry counters.
//!
//! Cheap to update from any thread; read via `snapshot` for tests and
//! diagnostics overlays.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DeviceStats {
    presents_attempted: AtomicU64,
    presents_succeeded: AtomicU64,
    resets_attempted: AtomicU64,
    resets_succeeded: AtomicU64,
    dirty_flush_uploads: AtomicU64,
    dirty_degradations: AtomicU64,
    resources_created: AtomicU64,
    resources_destroyed: AtomicU64,
}

impl DeviceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_presents_attempted(&self) {
        self.presents_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_presents_succeeded(&self) {
        self.presents_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resets_attempted(&self) {
        self.resets_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resets_succeeded(&self) {
        self.resets_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dirty_flush_uploads(&self) {
        self.dirty_flush_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dirty_degradations(&self) {
        self.dirty_degradations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resources_created(&self) {
        self.resources_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resources_destroyed(&self) {
        self.resources_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeviceStatsSnapshot {
        DeviceStatsSnapshot {
            presents_attempted: self.presents_attempted.load(Ordering::Relaxed),
            presents_succeeded: self.presents_succeeded.load(Ordering::Relaxed),
            resets_attempted: self.resets_attempted.load(Ordering::Relaxed),
            resets_succeeded: self.resets_succeeded.load(Ordering::Relaxed),
            dirty_flush_uploads: self.dirty_flush_uploads.load(Ordering::Relaxed),
            dirty_degradations: self.dirty_degradations.load(Ordering::Relaxed),
            resources_created: self.resources_created.load(Ordering::Relaxed),
            resources_destroyed: self.resources_destroyed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStatsSnapshot {
    pub presents_attempted: u64,
    pub presents_succeeded: u64,
    pub resets_attempted: u64,
    pub resets_succeeded: u64,
    pub dirty_flush_uploads: u64,
    pub dirty_degradations: u64,
    pub resources_created: u64,
    pub resources_destroyed: u64,
}
