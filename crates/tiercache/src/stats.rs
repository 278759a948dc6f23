//! Counters and serializable statistics snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tiercache_config::MemoryPolicyKind;

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Counters kept by every memory policy.
#[derive(Debug, Default)]
pub(crate) struct MemoryCounters {
    puts: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCounters {
    pub fn put(&self) {
        bump(&self.puts);
    }

    pub fn hit(&self) {
        bump(&self.hits);
    }

    pub fn miss(&self) {
        bump(&self.misses);
    }

    pub fn evicted(&self, count: usize) {
        self.evictions
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        policy: MemoryPolicyKind,
        size: usize,
        capacity: usize,
        empty_references: usize,
    ) -> MemoryStats {
        MemoryStats {
            policy,
            size,
            capacity,
            empty_references,
            puts: read(&self.puts),
            hits: read(&self.hits),
            misses: read(&self.misses),
            evictions: read(&self.evictions),
        }
    }
}

/// Memory tier statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub policy: MemoryPolicyKind,
    pub size: usize,
    pub capacity: usize,
    /// Index entries whose element has been reclaimed (soft policy only).
    pub empty_references: usize,
    pub puts: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Region-level counters.
#[derive(Debug, Default)]
pub(crate) struct RegionCounters {
    pub updates: AtomicU64,
    pub hits_memory: AtomicU64,
    pub hits_auxiliary: AtomicU64,
    pub misses_not_found: AtomicU64,
    pub misses_expired: AtomicU64,
    pub removes: AtomicU64,
}

impl RegionCounters {
    pub fn record(counter: &AtomicU64) {
        bump(counter);
    }
}

/// Spool worker counters.
#[derive(Debug, Default)]
pub(crate) struct SpoolCounters {
    pub queued: AtomicU64,
    pub overflowed: AtomicU64,
    pub spooled: AtomicU64,
    pub failures: AtomicU64,
    pub dropped: AtomicU64,
}

impl SpoolCounters {
    pub fn snapshot(&self, in_flight: usize) -> SpoolStats {
        SpoolStats {
            queued: read(&self.queued),
            overflowed: read(&self.overflowed),
            spooled: read(&self.spooled),
            failures: read(&self.failures),
            dropped: read(&self.dropped),
            in_flight,
        }
    }
}

/// Spool worker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SpoolStats {
    /// Jobs accepted by the queue.
    pub queued: u64,
    /// Jobs that found the queue full and waited for room.
    pub overflowed: u64,
    /// Elements written to a disk auxiliary.
    pub spooled: u64,
    /// Auxiliary calls that failed or timed out.
    pub failures: u64,
    /// Elements that could not be spilled at all.
    pub dropped: u64,
    /// Keys currently waiting for the worker.
    pub in_flight: usize,
}

/// Point-in-time statistics of a region.
#[derive(Debug, Clone, Serialize)]
pub struct RegionStats {
    pub region: String,
    pub alive: bool,
    pub updates: u64,
    pub hits_memory: u64,
    pub hits_auxiliary: u64,
    pub misses_not_found: u64,
    pub misses_expired: u64,
    pub removes: u64,
    pub memory: MemoryStats,
    pub spool: SpoolStats,
    pub auxiliaries: Vec<String>,
}

impl RegionStats {
    pub(crate) fn new(
        region: &str,
        alive: bool,
        counters: &RegionCounters,
        memory: MemoryStats,
        spool: SpoolStats,
        auxiliaries: Vec<String>,
    ) -> Self {
        Self {
            region: region.to_string(),
            alive,
            updates: read(&counters.updates),
            hits_memory: read(&counters.hits_memory),
            hits_auxiliary: read(&counters.hits_auxiliary),
            misses_not_found: read(&counters.misses_not_found),
            misses_expired: read(&counters.misses_expired),
            removes: read(&counters.removes),
            memory,
            spool,
            auxiliaries,
        }
    }

    /// Fraction of reads served without a miss.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits_memory + self.hits_auxiliary;
        let total = hits + self.misses_not_found + self.misses_expired;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
