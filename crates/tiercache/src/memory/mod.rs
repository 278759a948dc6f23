//! Capacity-bounded memory tier with pluggable eviction policies.
//!
//! Every policy guards its index and its ordering structure with a single
//! lock, so recency order and index contents never diverge. Evicted
//! elements are returned to the caller instead of being pushed through a
//! callback: the region forwards them to the spool queue after the memory
//! lock has been released.

mod hash_ordered;
mod recency;
mod soft;

use std::sync::Arc;

use tiercache_config::MemoryPolicyKind;

use crate::element::CacheElement;
use crate::key::CacheKey;
use crate::stats::MemoryStats;

pub use hash_ordered::HashOrderedMemoryStore;
pub use recency::LruMemoryStore;
pub use soft::SoftMemoryStore;

/// Shared element handle.
pub type ElementRef<K, V> = Arc<CacheElement<K, V>>;

/// A key→element store with an eviction order.
pub trait MemoryStore<K: CacheKey, V>: Send + Sync {
    /// Which policy this store implements.
    fn policy(&self) -> MemoryPolicyKind;

    /// Configured capacity (`max_objects`).
    fn capacity(&self) -> usize;

    /// Delimiter used to recognise hierarchical string keys.
    fn hierarchy_delimiter(&self) -> char;

    /// Insert or replace an element. Returns the elements evicted to make
    /// room, oldest first; they are no longer in the store.
    fn update(&self, element: ElementRef<K, V>) -> Vec<ElementRef<K, V>>;

    /// Look up an element and promote it. Access time is left to the
    /// caller, which touches it once the element is known to be fresh.
    fn get(&self, key: &K) -> Option<ElementRef<K, V>>;

    /// Look up an element without touching order or access time.
    fn get_quiet(&self, key: &K) -> Option<ElementRef<K, V>>;

    /// Remove exactly this key.
    fn remove_exact(&self, key: &K) -> Option<ElementRef<K, V>>;

    /// Remove everything.
    fn remove_all(&self);

    /// Evict up to `count` elements from the cold end, oldest first.
    fn free_elements(&self, count: usize) -> Vec<ElementRef<K, V>>;

    /// Point-in-time copy of the live keys.
    fn key_set(&self) -> Vec<K>;

    /// Number of live elements.
    fn size(&self) -> usize;

    fn stats(&self) -> MemoryStats;

    /// Remove every element and return them in eviction order.
    fn drain(&self) -> Vec<ElementRef<K, V>> {
        self.free_elements(usize::MAX)
    }

    /// Remove a key, or every key under it when it is a hierarchy root.
    ///
    /// The hierarchical scan works on a key snapshot and removes matches one
    /// at a time, so the index lock is never held for the whole scan.
    fn remove(&self, key: &K) -> Vec<ElementRef<K, V>> {
        let delimiter = self.hierarchy_delimiter();
        if key.is_hierarchy_root(delimiter) {
            self.key_set()
                .into_iter()
                .filter(|candidate| candidate.is_descendant_of(key, delimiter))
                .filter_map(|candidate| self.remove_exact(&candidate))
                .collect()
        } else {
            self.remove_exact(key).into_iter().collect()
        }
    }
}

/// Build the memory store for a policy.
pub fn create_store<K, V>(
    policy: MemoryPolicyKind,
    capacity: usize,
    delimiter: char,
) -> Box<dyn MemoryStore<K, V>>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    match policy {
        MemoryPolicyKind::Lru => Box::new(LruMemoryStore::new(capacity, delimiter)),
        MemoryPolicyKind::Soft => Box::new(SoftMemoryStore::new(capacity, delimiter)),
        MemoryPolicyKind::HashOrdered => Box::new(HashOrderedMemoryStore::new(capacity, delimiter)),
    }
}
