//! Shared health state for the /health endpoint.
//! Updated by the ingestion scheduler and the movement writer.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Shared health counters. Updated by tracker components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// Millisecond timestamp of the last completed ingestion cycle (0 = none).
    pub last_cycle_at_ms: AtomicI64,
    pub cycles_completed: AtomicU64,
    /// Cycles where the event list could not be fetched.
    pub cycles_failed: AtomicU64,
    /// Market fetches that failed inside otherwise healthy cycles.
    pub market_fetch_errors: AtomicU64,
    pub snapshots_written: AtomicU64,
    pub movements_flagged: AtomicU64,
    /// Approximate count of movements queued for DB write.
    pub write_queue_pending: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, at_ms: i64, snapshots: u64, movements: u64, market_errors: u64) {
        self.last_cycle_at_ms.store(at_ms, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.snapshots_written.fetch_add(snapshots, Ordering::Relaxed);
        self.movements_flagged.fetch_add(movements, Ordering::Relaxed);
        self.market_fetch_errors.fetch_add(market_errors, Ordering::Relaxed);
    }

    pub fn record_failed_cycle(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        // Saturating: a dropped send never incremented.
        let _ = self
            .write_queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn last_cycle_at_ms(&self) -> i64 {
        self.last_cycle_at_ms.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn market_fetch_errors(&self) -> u64 {
        self.market_fetch_errors.load(Ordering::Relaxed)
    }

    pub fn snapshots_written(&self) -> u64 {
        self.snapshots_written.load(Ordering::Relaxed)
    }

    pub fn movements_flagged(&self) -> u64 {
        self.movements_flagged.load(Ordering::Relaxed)
    }

    pub fn write_queue_pending(&self) -> u64 {
        self.write_queue_pending.load(Ordering::Relaxed)
    }
}
