//! Recency-ordered (LRU) memory store.
//!
//! Descriptors live in an arena and are linked by handle, most recent at
//! the head. The key index maps to handles. Index and list share one mutex.

use std::collections::HashMap;

use parking_lot::Mutex;
use tiercache_config::MemoryPolicyKind;

use super::{ElementRef, MemoryStore};
use crate::key::CacheKey;
use crate::stats::{MemoryCounters, MemoryStats};

type Handle = usize;

struct Node<K, V> {
    element: ElementRef<K, V>,
    prev: Option<Handle>,
    next: Option<Handle>,
}

/// Slot arena plus intrusive list over handles.
struct Arena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<Handle>,
    head: Option<Handle>,
    tail: Option<Handle>,
    index: HashMap<K, Handle>,
}

impl<K: CacheKey, V> Arena<K, V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, handle: Handle) -> Option<&Node<K, V>> {
        self.slots.get(handle).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, handle: Handle) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(handle).and_then(Option::as_mut)
    }

    fn unlink(&mut self, handle: Handle) {
        let Some((prev, next)) = self.node(handle).map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.node_mut(handle) {
            node.prev = None;
            node.next = None;
        }
    }

    fn link_front(&mut self, handle: Handle) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(handle) {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.node_mut(h) {
                    node.prev = Some(handle);
                }
            }
            None => self.tail = Some(handle),
        }
        self.head = Some(handle);
    }

    fn move_to_front(&mut self, handle: Handle) {
        if self.head != Some(handle) {
            self.unlink(handle);
            self.link_front(handle);
        }
    }

    /// Allocate a slot for `element` and link it at the head.
    fn insert(&mut self, element: ElementRef<K, V>) {
        let key = element.key().clone();
        let node = Node {
            element,
            prev: None,
            next: None,
        };
        let handle = match self.free.pop() {
            Some(handle) => {
                self.slots[handle] = Some(node);
                handle
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.link_front(handle);
        self.index.insert(key, handle);
    }

    /// Unlink and free a slot. The caller maintains the index.
    fn release(&mut self, handle: Handle) -> Option<ElementRef<K, V>> {
        self.unlink(handle);
        let node = self.slots.get_mut(handle)?.take()?;
        self.free.push(handle);
        Some(node.element)
    }

    fn remove(&mut self, key: &K) -> Option<ElementRef<K, V>> {
        let handle = self.index.remove(key)?;
        self.release(handle)
    }

    fn pop_back(&mut self) -> Option<ElementRef<K, V>> {
        let tail = self.tail?;
        let element = self.release(tail)?;
        self.index.remove(element.key());
        Some(element)
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.index.clear();
    }

    /// Keys from least to most recently used.
    fn keys_oldest_first(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.tail;
        while let Some(handle) = cursor {
            let Some(node) = self.node(handle) else {
                break;
            };
            keys.push(node.element.key().clone());
            cursor = node.prev;
        }
        keys
    }
}

/// Capacity-bounded LRU store.
///
/// `get` moves the element to the head; `update` inserts at the head and
/// evicts from the tail until the store is back within capacity. Elements
/// never read are evicted in insertion order.
pub struct LruMemoryStore<K, V> {
    inner: Mutex<Arena<K, V>>,
    capacity: usize,
    delimiter: char,
    counters: MemoryCounters,
}

impl<K: CacheKey, V> LruMemoryStore<K, V> {
    pub fn new(capacity: usize, delimiter: char) -> Self {
        Self {
            inner: Mutex::new(Arena::new()),
            capacity,
            delimiter,
            counters: MemoryCounters::default(),
        }
    }
}

impl<K, V> MemoryStore<K, V> for LruMemoryStore<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    fn policy(&self) -> MemoryPolicyKind {
        MemoryPolicyKind::Lru
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn hierarchy_delimiter(&self) -> char {
        self.delimiter
    }

    fn update(&self, element: ElementRef<K, V>) -> Vec<ElementRef<K, V>> {
        self.counters.put();
        let mut evicted = Vec::new();
        {
            let mut arena = self.inner.lock();
            arena.remove(element.key());
            arena.insert(element);
            while arena.len() > self.capacity {
                match arena.pop_back() {
                    Some(old) => evicted.push(old),
                    None => break,
                }
            }
        }
        self.counters.evicted(evicted.len());
        evicted
    }

    fn get(&self, key: &K) -> Option<ElementRef<K, V>> {
        let found = {
            let mut arena = self.inner.lock();
            match arena.index.get(key).copied() {
                Some(handle) => {
                    arena.move_to_front(handle);
                    arena.node(handle).map(|node| node.element.clone())
                }
                None => None,
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
        let arena = self.inner.lock();
        let handle = *arena.index.get(key)?;
        arena.node(handle).map(|node| node.element.clone())
    }

    fn remove_exact(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.inner.lock().remove(key)
    }

    fn remove_all(&self) {
        self.inner.lock().clear();
    }

    fn free_elements(&self, count: usize) -> Vec<ElementRef<K, V>> {
        let mut freed = Vec::new();
        let mut arena = self.inner.lock();
        while freed.len() < count {
            match arena.pop_back() {
                Some(element) => freed.push(element),
                None => break,
            }
        }
        freed
    }

    fn key_set(&self) -> Vec<K> {
        self.inner.lock().keys_oldest_first()
    }

    fn size(&self) -> usize {
        self.inner.lock().len()
    }

    fn stats(&self) -> MemoryStats {
        self.counters
            .snapshot(MemoryPolicyKind::Lru, self.size(), self.capacity, 0)
    }
}
