//! GC-cooperative memory store.
//!
//! The index holds `Weak` handles; a FIFO of strong handles keeps the
//! `max_objects` most recently touched elements alive. When an element falls
//! off the strong queue it is returned for spilling but stays reachable
//! through the index for as long as anything else (a caller, the spool
//! queue, an in-process auxiliary) still holds it. Once the last strong
//! handle is dropped the index entry becomes an empty reference: lookups
//! miss and stats report it until it is pruned.
//!
//! Reclamation is deterministic here: an element is reclaimed the moment its
//! last `Arc` drops, not under memory pressure.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tiercache_config::MemoryPolicyKind;

use super::{ElementRef, MemoryStore};
use crate::element::CacheElement;
use crate::key::CacheKey;
use crate::stats::{MemoryCounters, MemoryStats};

/// Extra index entries tolerated before dead references are pruned.
const PRUNE_SLACK: usize = 64;

struct SoftInner<K, V> {
    index: HashMap<K, Weak<CacheElement<K, V>>>,
    /// Strong handles, oldest first, tagged with the stamp they were pushed with.
    strong: VecDeque<(u64, ElementRef<K, V>)>,
    /// Latest stamp per key; older queue entries for the key are stale.
    latest: HashMap<K, u64>,
    next_stamp: u64,
}

impl<K: CacheKey, V> SoftInner<K, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            strong: VecDeque::new(),
            latest: HashMap::new(),
            next_stamp: 0,
        }
    }

    fn hold(&mut self, element: ElementRef<K, V>) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.latest.insert(element.key().clone(), stamp);
        self.strong.push_back((stamp, element));
    }

    fn is_current(&self, stamp: u64, element: &ElementRef<K, V>) -> bool {
        self.latest.get(element.key()) == Some(&stamp)
    }

    /// Pop the oldest current strong handle, discarding stale ones.
    fn pop_strong(&mut self) -> Option<ElementRef<K, V>> {
        while let Some((stamp, element)) = self.strong.pop_front() {
            if self.is_current(stamp, &element) {
                self.latest.remove(element.key());
                return Some(element);
            }
        }
        None
    }

    fn trim(&mut self, max: usize) -> Vec<ElementRef<K, V>> {
        let mut evicted = Vec::new();
        while self.latest.len() > max {
            match self.pop_strong() {
                Some(element) => evicted.push(element),
                None => break,
            }
        }
        if self.strong.len() > 2 * self.latest.len() + PRUNE_SLACK {
            let latest = &self.latest;
            self.strong
                .retain(|(stamp, element)| latest.get(element.key()) == Some(stamp));
        }
        evicted
    }

    fn prune_if_needed(&mut self, max: usize) {
        if self.index.len() > 2 * max + PRUNE_SLACK {
            self.index.retain(|_, weak| weak.strong_count() > 0);
        }
    }

    fn live(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.index.get(key).and_then(Weak::upgrade)
    }

    fn forget(&mut self, key: &K) -> Option<ElementRef<K, V>> {
        self.latest.remove(key);
        self.index.remove(key).and_then(|weak| weak.upgrade())
    }

    fn live_count(&self) -> usize {
        self.index.values().filter(|w| w.strong_count() > 0).count()
    }
}

/// Soft-reference style store: bounded strong set over an unbounded weak index.
pub struct SoftMemoryStore<K, V> {
    inner: Mutex<SoftInner<K, V>>,
    capacity: usize,
    delimiter: char,
    counters: MemoryCounters,
}

impl<K: CacheKey, V> SoftMemoryStore<K, V> {
    pub fn new(capacity: usize, delimiter: char) -> Self {
        Self {
            inner: Mutex::new(SoftInner::new()),
            capacity,
            delimiter,
            counters: MemoryCounters::default(),
        }
    }

    /// Number of elements currently held strongly.
    pub fn strong_count(&self) -> usize {
        self.inner.lock().latest.len()
    }
}

impl<K, V> MemoryStore<K, V> for SoftMemoryStore<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    fn policy(&self) -> MemoryPolicyKind {
        MemoryPolicyKind::Soft
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn hierarchy_delimiter(&self) -> char {
        self.delimiter
    }

    fn update(&self, element: ElementRef<K, V>) -> Vec<ElementRef<K, V>> {
        self.counters.put();
        let evicted = {
            let mut inner = self.inner.lock();
            inner
                .index
                .insert(element.key().clone(), Arc::downgrade(&element));
            inner.hold(element);
            let evicted = inner.trim(self.capacity);
            inner.prune_if_needed(self.capacity);
            evicted
        };
        self.counters.evicted(evicted.len());
        evicted
    }

    /// Reads re-hold the element strongly. The strong set may exceed
    /// `max_objects` until the next `update` trims it.
    fn get(&self, key: &K) -> Option<ElementRef<K, V>> {
        let found = {
            let mut inner = self.inner.lock();
            match inner.live(key) {
                Some(element) => {
                    inner.hold(element.clone());
                    Some(element)
                }
                None => {
                    if inner.index.get(key).is_some() {
                        inner.forget(key);
                    }
                    None
                }
            }
        };
        match found {
            Some(element) => {
                self.counters.hit();
                Some(element)
            }
            None => {
                self.counters.miss();
                None
            }
        }
    }

    fn get_quiet(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.inner.lock().live(key)
    }

    fn remove_exact(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.inner.lock().forget(key)
    }

    fn remove_all(&self) {
        let mut inner = self.inner.lock();
        inner.index.clear();
        inner.strong.clear();
        inner.latest.clear();
    }

    /// Strongly held elements go first, oldest first; weakly reachable ones after.
    fn free_elements(&self, count: usize) -> Vec<ElementRef<K, V>> {
        let mut inner = self.inner.lock();
        let mut freed = Vec::new();
        while freed.len() < count {
            match inner.pop_strong() {
                Some(element) => {
                    inner.index.remove(element.key());
                    freed.push(element);
                }
                None => break,
            }
        }
        if freed.len() < count {
            let remaining: Vec<K> = inner.index.keys().cloned().collect();
            for key in remaining {
                if freed.len() >= count {
                    break;
                }
                if let Some(element) = inner.forget(&key) {
                    freed.push(element);
                }
            }
        }
        if inner.latest.is_empty() {
            inner.strong.clear();
        }
        freed
    }

    /// Live keys only. Empty references are skipped, not pruned; `get` and
    /// `update` do the pruning.
    fn key_set(&self) -> Vec<K> {
        self.inner
            .lock()
            .index
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn size(&self) -> usize {
        self.inner.lock().live_count()
    }

    fn stats(&self) -> MemoryStats {
        let (size, empty) = {
            let inner = self.inner.lock();
            let live = inner.live_count();
            (live, inner.index.len() - live)
        };
        self.counters
            .snapshot(MemoryPolicyKind::Soft, size, self.capacity, empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::test_support::{element, keys};

    fn store(capacity: usize) -> SoftMemoryStore<String, String> {
        SoftMemoryStore::new(capacity, ':')
    }

    #[test]
    fn test_strong_set_is_bounded() {
        let store = store(2);
        store.update(element("a", "1"));
        store.update(element("b", "2"));
        let evicted = store.update(element("c", "3"));
        assert_eq!(keys(&evicted), vec!["a"]);
        assert_eq!(store.strong_count(), 2);
    }

    #[test]
    fn test_evicted_element_reachable_while_held() {
        let store = store(1);
        store.update(element("a", "1"));
        let mut evicted = store.update(element("b", "2"));
        let held = evicted.pop().unwrap();

        let found = store.get(&"a".to_string()).unwrap();
        assert!(Arc::ptr_eq(&found, &held));
    }

    #[test]
    fn test_reclaimed_element_is_empty_reference() {
        let store = store(1);
        store.update(element("a", "1"));
        drop(store.update(element("b", "2")));

        let stats = store.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.empty_references, 1);

        assert!(store.get(&"a".to_string()).is_none());
        assert_eq!(store.stats().empty_references, 0);
    }

    #[test]
    fn test_key_set_leaves_empty_references_alone() {
        let store = store(1);
        store.update(element("a", "1"));
        drop(store.update(element("b", "2")));
        assert_eq!(store.stats().empty_references, 1);

        assert_eq!(store.key_set(), vec!["b"]);
        assert_eq!(store.key_set(), vec!["b"]);
        assert_eq!(store.stats().empty_references, 1);
        assert_eq!(store.stats().size, 1);
    }

    #[test]
    fn test_touching_same_key_does_not_evict() {
        let store = store(2);
        store.update(element("a", "1"));
        store.update(element("b", "2"));
        for _ in 0..10 {
            assert!(store.get(&"a".to_string()).is_some());
        }
        assert!(store.update(element("a", "again")).is_empty());
        let evicted = store.update(element("c", "3"));
        assert_eq!(keys(&evicted), vec!["b"]);
    }

    #[test]
    fn test_stale_entries_are_compacted() {
        let store = store(1);
        store.update(element("a", "1"));
        for _ in 0..1000 {
            store.get(&"a".to_string());
        }
        store.update(element("a", "2"));
        assert!(store.inner.lock().strong.len() <= 2 + PRUNE_SLACK);
    }

    #[test]
    fn test_hierarchical_remove() {
        let store = store(100);
        for i in 0..10 {
            store.update(element(&format!("root:{i}:key"), "v"));
        }
        store.update(element("test", "v"));
        assert_eq!(store.remove(&"root:".to_string()).len(), 10);
        assert_eq!(store.key_set(), vec!["test"]);
    }

    #[test]
    fn test_drain_returns_every_live_element() {
        let store = store(1);
        store.update(element("a", "1"));
        let held = store.update(element("b", "2"));
        let mut drained = keys(&store.drain());
        drained.sort();
        assert_eq!(drained, vec!["a", "b"]);
        assert_eq!(store.size(), 0);
        drop(held);
    }
}
