//! Hash-ordered memory store backed by `lru::LruCache`.
//!
//! The map evicts on its own when a push overflows it and hands the evicted
//! entry back from `push`; that return value is this policy's eviction
//! callback. It only collects the element, the spill happens outside the lock.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tiercache_config::MemoryPolicyKind;

use super::{ElementRef, MemoryStore};
use crate::key::CacheKey;
use crate::stats::{MemoryCounters, MemoryStats};

pub struct HashOrderedMemoryStore<K: CacheKey, V> {
    inner: Mutex<LruCache<K, ElementRef<K, V>>>,
    capacity: usize,
    delimiter: char,
    counters: MemoryCounters,
}

impl<K: CacheKey, V> HashOrderedMemoryStore<K, V> {
    pub fn new(capacity: usize, delimiter: char) -> Self {
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(bound)),
            capacity,
            delimiter,
            counters: MemoryCounters::default(),
        }
    }
}

impl<K, V> MemoryStore<K, V> for HashOrderedMemoryStore<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    fn policy(&self) -> MemoryPolicyKind {
        MemoryPolicyKind::HashOrdered
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn hierarchy_delimiter(&self) -> char {
        self.delimiter
    }

    fn update(&self, element: ElementRef<K, V>) -> Vec<ElementRef<K, V>> {
        self.counters.put();
        let incoming = element.clone();
        let mut evicted = Vec::new();
        {
            let mut map = self.inner.lock();
            if let Some((old_key, old)) = map.push(element.key().clone(), element)
                && old_key != *incoming.key()
            {
                evicted.push(old);
            }
            // The map cannot be built with a zero bound.
            if self.capacity == 0
                && let Some((_, only)) = map.pop_lru()
            {
                evicted.push(only);
            }
        }
        self.counters.evicted(evicted.len());
        evicted
    }

    fn get(&self, key: &K) -> Option<ElementRef<K, V>> {
        let found = self.inner.lock().get(key).cloned();
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
        self.inner.lock().peek(key).cloned()
    }

    fn remove_exact(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.inner.lock().pop(key)
    }

    fn remove_all(&self) {
        self.inner.lock().clear();
    }

    fn free_elements(&self, count: usize) -> Vec<ElementRef<K, V>> {
        let mut map = self.inner.lock();
        let mut freed = Vec::new();
        while freed.len() < count {
            match map.pop_lru() {
                Some((_, element)) => freed.push(element),
                None => break,
            }
        }
        freed
    }

    fn key_set(&self) -> Vec<K> {
        self.inner.lock().iter().rev().map(|(k, _)| k.clone()).collect()
    }

    fn size(&self) -> usize {
        self.inner.lock().len()
    }

    fn stats(&self) -> MemoryStats {
        self.counters
            .snapshot(MemoryPolicyKind::HashOrdered, self.size(), self.capacity, 0)
    }
}
