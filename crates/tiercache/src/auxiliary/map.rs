//! In-process map auxiliary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use tracing::trace;

use super::{Auxiliary, AuxiliaryError, AuxiliaryKind, AuxiliaryResult};
use crate::key::CacheKey;
use crate::memory::ElementRef;

/// Stores every element it is given in a hash map.
///
/// Useful as a stand-in disk tier and for exercising regions; the class tag
/// is configurable so it can also play a lateral or remote store.
pub struct MapAuxiliary<K, V> {
    name: String,
    kind: AuxiliaryKind,
    entries: RwLock<HashMap<K, ElementRef<K, V>>>,
    updates: AtomicU64,
    disposed: AtomicBool,
}

impl<K: CacheKey, V> MapAuxiliary<K, V> {
    pub fn new(name: impl Into<String>, kind: AuxiliaryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            entries: RwLock::new(HashMap::new()),
            updates: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// A disk-class map.
    pub fn disk(name: impl Into<String>) -> Self {
        Self::new(name, AuxiliaryKind::Disk)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of `update` calls received.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> AuxiliaryResult<()> {
        if self.is_disposed() {
            Err(AuxiliaryError::Unavailable(format!("{} is disposed", self.name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<K, V> Auxiliary<K, V> for MapAuxiliary<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AuxiliaryKind {
        self.kind
    }

    async fn get(&self, key: &K) -> AuxiliaryResult<Option<ElementRef<K, V>>> {
        self.ensure_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn update(&self, element: ElementRef<K, V>) -> AuxiliaryResult<()> {
        self.ensure_open()?;
        trace!(auxiliary = %self.name, key = %element.key(), "Storing element");
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(element.key().clone(), element);
        Ok(())
    }

    async fn remove(&self, key: &K, delimiter: char) -> AuxiliaryResult<bool> {
        self.ensure_open()?;
        let mut entries = self.entries.write();
        if key.is_hierarchy_root(delimiter) {
            let before = entries.len();
            entries.retain(|candidate, _| !candidate.is_descendant_of(key, delimiter));
            Ok(entries.len() != before)
        } else {
            Ok(entries.remove(key).is_some())
        }
    }

    async fn remove_all(&self) -> AuxiliaryResult<()> {
        self.ensure_open()?;
        self.entries.write().clear();
        Ok(())
    }

    async fn get_matching(&self, pattern: &Regex) -> AuxiliaryResult<HashMap<K, ElementRef<K, V>>> {
        self.ensure_open()?;
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(key, _)| pattern.is_match(&key.match_text()))
            .map(|(key, element)| (key.clone(), element.clone()))
            .collect())
    }

    async fn dispose(&self) -> AuxiliaryResult<()> {
        self.disposed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
