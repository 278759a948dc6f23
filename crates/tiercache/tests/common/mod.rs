//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use tiercache::{
    Auxiliary, AuxiliaryError, AuxiliaryKind, AuxiliaryResult, CacheEvent, CacheEventKind, ElementRef,
    EventSink, MapAuxiliary, Region, RegionConfig,
};

/// Records every event as `(kind, key)`.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(CacheEventKind, Option<String>)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(CacheEventKind, Option<String>)> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: CacheEventKind) -> usize {
        self.events.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn keys_for(&self, kind: CacheEventKind) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .filter_map(|(_, key)| key.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &CacheEvent<'_>) {
        self.events
            .lock()
            .push((event.kind, event.key.map(|k| k.to_string())));
    }
}

/// An auxiliary whose every call fails.
pub struct FailingAuxiliary {
    kind: AuxiliaryKind,
    pub calls: AtomicUsize,
}

impl FailingAuxiliary {
    pub fn new(kind: AuxiliaryKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> AuxiliaryResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AuxiliaryError::Io("disk on fire".to_string()))
    }
}

#[async_trait]
impl Auxiliary<String, String> for FailingAuxiliary {
    fn name(&self) -> &str {
        "failing"
    }

    fn kind(&self) -> AuxiliaryKind {
        self.kind
    }

    async fn get(&self, _key: &String) -> AuxiliaryResult<Option<ElementRef<String, String>>> {
        self.fail()
    }

    async fn update(&self, _element: ElementRef<String, String>) -> AuxiliaryResult<()> {
        self.fail()
    }

    async fn remove(&self, _key: &String, _delimiter: char) -> AuxiliaryResult<bool> {
        self.fail()
    }

    async fn remove_all(&self) -> AuxiliaryResult<()> {
        self.fail()
    }

    async fn get_matching(
        &self,
        _pattern: &Regex,
    ) -> AuxiliaryResult<HashMap<String, ElementRef<String, String>>> {
        self.fail()
    }
}

/// Wraps a [`MapAuxiliary`] and delays writes or read replies.
pub struct SlowAuxiliary {
    inner: MapAuxiliary<String, String>,
    write_delay: Duration,
    read_delay: Duration,
}

impl SlowAuxiliary {
    /// Slow writes, instant reads.
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MapAuxiliary::disk("slow"),
            write_delay: delay,
            read_delay: Duration::ZERO,
        })
    }

    /// Instant writes; reads answer immediately but return after `delay`.
    pub fn slow_reads(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MapAuxiliary::disk("slow"),
            write_delay: Duration::ZERO,
            read_delay: delay,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl Auxiliary<String, String> for SlowAuxiliary {
    fn name(&self) -> &str {
        "slow"
    }

    fn kind(&self) -> AuxiliaryKind {
        AuxiliaryKind::Disk
    }

    async fn get(&self, key: &String) -> AuxiliaryResult<Option<ElementRef<String, String>>> {
        let found = self.inner.get(key).await;
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        found
    }

    async fn update(&self, element: ElementRef<String, String>) -> AuxiliaryResult<()> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        self.inner.update(element).await
    }

    async fn remove(&self, key: &String, delimiter: char) -> AuxiliaryResult<bool> {
        self.inner.remove(key, delimiter).await
    }

    async fn remove_all(&self) -> AuxiliaryResult<()> {
        self.inner.remove_all().await
    }

    async fn get_matching(
        &self,
        pattern: &Regex,
    ) -> AuxiliaryResult<HashMap<String, ElementRef<String, String>>> {
        self.inner.get_matching(pattern).await
    }
}

/// A region with one disk-class map auxiliary.
pub fn region_with_disk(
    name: &str,
    config: RegionConfig,
) -> (Arc<Region<String, String>>, Arc<MapAuxiliary<String, String>>) {
    let disk: Arc<MapAuxiliary<String, String>> = Arc::new(MapAuxiliary::disk("disk"));
    let region = Region::builder(name, config)
        .with_auxiliary(disk.clone())
        .build()
        .expect("region should build");
    (region, disk)
}
