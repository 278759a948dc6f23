//! The region controller.
//!
//! A [`Region`] owns one memory store and an ordered list of auxiliaries.
//! Memory operations are synchronous and never wait on I/O; capacity
//! evictions and write-through copies go to the spool worker. Reads that
//! miss memory fall through to the in-flight spool jobs and then to the
//! auxiliaries in configured order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tiercache_config::RegionConfig;
use tracing::{debug, info, warn};

use crate::auxiliary::AuxiliaryRef;
use crate::element::{CacheElement, ElementAttributes, Expiry, now_millis};
use crate::error::{Error, Result};
use crate::event::{CacheEvent, CacheEventKind, ElementEventType, EventSink, HitTier, TracingSink};
use crate::key::CacheKey;
use crate::memory::{ElementRef, MemoryStore, create_store};
use crate::spool::{AuxiliaryTier, SpoolQueue};
use crate::stats::{RegionCounters, RegionStats};
use crate::sweeper::{ExpirationSweeper, SweeperHandle};

/// Outcome of [`Region::dispose`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DisposeReport {
    /// Elements written to a disk auxiliary.
    pub flushed: usize,
    /// Elements left behind: not spoolable, no disk auxiliary, or rejected.
    pub skipped: usize,
}

/// Orders memory writes and their spills against removal.
///
/// Puts, promotions and demotions hold the lock while they update memory and
/// queue evictions. A read snapshots `epoch` before asking the auxiliaries and
/// only promotes what it found if no removal began or was running since.
#[derive(Debug, Default)]
struct RemovalFence {
    epoch: u64,
    active: usize,
}

impl RemovalFence {
    fn admits(&self, snapshot: u64) -> bool {
        self.active == 0 && self.epoch == snapshot
    }
}

/// Ends a removal on drop, so a cancelled `remove` cannot leave the fence shut.
struct RemovalGuard<'a> {
    fence: &'a Mutex<RemovalFence>,
}

impl Drop for RemovalGuard<'_> {
    fn drop(&mut self) {
        let mut fence = self.fence.lock();
        fence.epoch += 1;
        fence.active -= 1;
    }
}

/// Builds a [`Region`]. Create through [`Region::builder`].
pub struct RegionBuilder<K: CacheKey, V: Send + Sync + 'static> {
    name: String,
    config: RegionConfig,
    auxiliaries: Vec<AuxiliaryRef<K, V>>,
    sink: Arc<dyn EventSink>,
}

impl<K, V> RegionBuilder<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    /// Append an auxiliary. Order matters for spill and read-through.
    pub fn with_auxiliary(mut self, auxiliary: AuxiliaryRef<K, V>) -> Self {
        self.auxiliaries.push(auxiliary);
        self
    }

    pub fn with_auxiliaries(mut self, auxiliaries: impl IntoIterator<Item = AuxiliaryRef<K, V>>) -> Self {
        self.auxiliaries.extend(auxiliaries);
        self
    }

    /// Event sink; defaults to [`TracingSink`].
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate the configuration and start the spool worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<Arc<Region<K, V>>> {
        self.config.validate(&self.name)?;

        let name: Arc<str> = Arc::from(self.name.as_str());
        let memory = create_store(
            self.config.memory_policy,
            self.config.max_objects,
            self.config.hierarchy_delimiter,
        );
        let tier = Arc::new(AuxiliaryTier::new(
            name.clone(),
            self.auxiliaries,
            &self.config,
            self.sink.clone(),
        ));
        let spool = SpoolQueue::start(tier.clone(), self.config.spool_queue_capacity);

        info!(
            region = %name,
            policy = %self.config.memory_policy,
            max_objects = self.config.max_objects,
            auxiliaries = ?tier.names(),
            "Region created"
        );

        Ok(Arc::new(Region {
            name,
            config: self.config,
            memory,
            tier,
            spool,
            sink: self.sink,
            counters: RegionCounters::default(),
            fence: Mutex::new(RemovalFence::default()),
            alive: AtomicBool::new(true),
            disposing: tokio::sync::Mutex::new(()),
            sweeper: Mutex::new(None),
        }))
    }
}

/// A named cache region.
pub struct Region<K: CacheKey, V: Send + Sync + 'static> {
    name: Arc<str>,
    config: RegionConfig,
    memory: Box<dyn MemoryStore<K, V>>,
    tier: Arc<AuxiliaryTier<K, V>>,
    spool: SpoolQueue<K, V>,
    sink: Arc<dyn EventSink>,
    counters: RegionCounters,
    fence: Mutex<RemovalFence>,
    alive: AtomicBool,
    disposing: tokio::sync::Mutex<()>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl<K, V> Region<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>, config: RegionConfig) -> RegionBuilder<K, V> {
        RegionBuilder {
            name: name.into(),
            config,
            auxiliaries: Vec::new(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::Disposed(self.name.to_string()))
        }
    }

    fn emit(&self, kind: CacheEventKind, key: Option<&K>) {
        self.sink.emit(&CacheEvent {
            region: &self.name,
            kind,
            key: key.map(|k| k as &dyn fmt::Display),
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────

    /// Store a value with the region's default element attributes.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        let attributes = ElementAttributes::from_template(&self.config.element);
        self.put_with(key, value, attributes)
    }

    /// Store a value with explicit attributes.
    pub fn put_with(&self, key: K, value: V, attributes: ElementAttributes) -> Result<()> {
        let element = Arc::new(CacheElement::new(self.name.clone(), key, value, attributes));
        self.put_element(element)
    }

    /// Store a prepared element.
    ///
    /// Capacity evictions are queued for spill before this returns; the
    /// auxiliary writes themselves happen on the spool worker.
    pub fn put_element(&self, element: ElementRef<K, V>) -> Result<()> {
        self.ensure_alive()?;
        if !element.key().is_valid() {
            return Err(Error::InvalidKey {
                region: self.name.to_string(),
                key: element.key().to_string(),
            });
        }

        {
            let _fence = self.fence.lock();
            // A pending spill of an older value must not land after this put.
            self.tier.cancel(element.key());
            let evicted = self.memory.update(element.clone());
            RegionCounters::record(&self.counters.updates);
            self.emit(CacheEventKind::Put, Some(element.key()));
            self.spill_all(evicted);
            self.spool.write_through(element);
        }
        Ok(())
    }

    fn spill_all(&self, evicted: Vec<ElementRef<K, V>>) {
        for element in evicted {
            self.emit(CacheEventKind::Evicted, Some(element.key()));
            self.spool.spill(element);
        }
    }

    /// Hand an element to the spool worker. The caller is responsible for
    /// having removed it from memory.
    pub fn spool(&self, element: ElementRef<K, V>) {
        let _fence = self.fence.lock();
        self.spool.spill(element);
    }

    /// Move one element from memory to the spool worker. Returns false if
    /// the key was no longer in memory.
    pub(crate) fn demote(&self, key: &K) -> bool {
        let _fence = self.fence.lock();
        match self.memory.remove_exact(key) {
            Some(element) => {
                self.emit(CacheEventKind::Demoted, Some(key));
                self.spool.spill(element);
                true
            }
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Look up a key in memory, then in-flight spool jobs, then every auxiliary.
    ///
    /// Returns `None` for missing and expired keys and on a disposed region.
    pub async fn get(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.get_inner(key, false).await
    }

    /// Like [`get`](Self::get) but skips lateral and remote auxiliaries.
    pub async fn local_get(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.get_inner(key, true).await
    }

    async fn get_inner(&self, key: &K, local_only: bool) -> Option<ElementRef<K, V>> {
        if !self.is_alive() {
            return None;
        }
        let now = now_millis();

        if let Some(element) = self.memory.get(key) {
            if self.expire_on_request(&element, now).await {
                return None;
            }
            element.attributes().touch_at(now);
            RegionCounters::record(&self.counters.hits_memory);
            self.emit(CacheEventKind::Hit(HitTier::Memory), Some(key));
            return Some(element);
        }

        let snapshot = self.fence.lock().epoch;
        let found = match self.tier.in_flight(key) {
            Some(element) => Some((element, HitTier::InFlight)),
            None => self
                .tier
                .get(key, local_only)
                .await
                .map(|element| (element, HitTier::Auxiliary)),
        };
        let Some((element, tier)) = found else {
            RegionCounters::record(&self.counters.misses_not_found);
            self.emit(CacheEventKind::Miss, Some(key));
            return None;
        };

        if self.expire_on_request(&element, now).await {
            return None;
        }
        element.attributes().touch_at(now);
        RegionCounters::record(&self.counters.hits_auxiliary);
        self.emit(CacheEventKind::Hit(tier), Some(key));
        if self.config.max_objects > 0 {
            self.promote(&element, snapshot);
        }
        Some(element)
    }

    /// Move a read-through hit into memory unless a removal overlapped the
    /// lookup or a put has since stored a newer value.
    fn promote(&self, element: &ElementRef<K, V>, snapshot: u64) {
        let fence = self.fence.lock();
        if !fence.admits(snapshot) {
            debug!(region = %self.name, key = %element.key(), "Removal overlapped read-through, not promoting");
            return;
        }
        if self.memory.get_quiet(element.key()).is_some() {
            return;
        }
        let evicted = self.memory.update(element.clone());
        self.spill_all(evicted);
    }

    /// Remove an element found expired by a read. Returns true if it was.
    async fn expire_on_request(&self, element: &ElementRef<K, V>, now: i64) -> bool {
        let event = match element.attributes().check_expiry(now) {
            Expiry::Fresh => return false,
            Expiry::MaxLifeExceeded => ElementEventType::ExceededMaxLifeOnRequest,
            Expiry::IdleTimeExceeded => ElementEventType::ExceededIdleTimeOnRequest,
        };
        self.emit(CacheEventKind::Element(event), Some(element.key()));
        RegionCounters::record(&self.counters.misses_expired);
        self.memory.remove_exact(element.key());
        self.tier.remove(element.key(), false).await;
        true
    }

    /// Memory-only lookup that leaves order and access time alone.
    pub fn get_quiet(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.memory.get_quiet(key)
    }

    /// [`get`](Self::get) for each key; absent keys are left out.
    pub async fn get_multiple(&self, keys: &[K]) -> HashMap<K, ElementRef<K, V>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(element) = self.get(key).await {
                found.insert(key.clone(), element);
            }
        }
        found
    }

    /// Every element whose key text matches `pattern`.
    ///
    /// Scans memory. Only when `max_objects` is zero are the first disk and
    /// the first remote auxiliary asked too; memory results win on conflict.
    pub async fn get_matching(&self, pattern: &str) -> Result<HashMap<K, ElementRef<K, V>>> {
        self.ensure_alive()?;
        let regex = Regex::new(pattern)?;
        let now = now_millis();

        let mut matches = HashMap::new();
        for key in self.memory.key_set() {
            if !regex.is_match(&key.match_text()) {
                continue;
            }
            let Some(element) = self.memory.get_quiet(&key) else {
                continue;
            };
            if self.expire_on_request(&element, now).await {
                continue;
            }
            element.attributes().touch_at(now);
            matches.insert(key, element);
        }

        if self.config.max_objects == 0 {
            for (key, element) in self.tier.get_matching(&regex).await {
                if element.attributes().check_expiry(now).is_expired() {
                    continue;
                }
                matches.entry(key).or_insert(element);
            }
        }
        debug!(region = %self.name, pattern, matches = matches.len(), "Matched keys");
        Ok(matches)
    }

    /// Snapshot of the keys held in memory.
    pub fn key_set(&self) -> Vec<K> {
        self.memory.key_set()
    }

    /// Number of elements held in memory.
    pub fn memory_size(&self) -> usize {
        self.memory.size()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Removal
    // ─────────────────────────────────────────────────────────────────────

    /// Remove a key, or a whole subtree when `key` is a hierarchy root, from
    /// memory and every auxiliary. Returns whether anything was removed.
    pub async fn remove(&self, key: &K) -> Result<bool> {
        self.remove_inner(key, false).await
    }

    /// Like [`remove`](Self::remove) but leaves lateral and remote auxiliaries alone.
    pub async fn local_remove(&self, key: &K) -> Result<bool> {
        self.remove_inner(key, true).await
    }

    async fn remove_inner(&self, key: &K, local_only: bool) -> Result<bool> {
        self.ensure_alive()?;
        let (_guard, removed) = self.begin_removal(|memory| memory.remove(key));
        let removed_elsewhere = self.tier.remove(key, local_only).await;
        RegionCounters::record(&self.counters.removes);
        self.emit(CacheEventKind::Remove, Some(key));
        debug!(region = %self.name, key = %key, from_memory = removed.len(), "Removed");
        Ok(!removed.is_empty() || removed_elsewhere)
    }

    /// Empty memory and every auxiliary.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_alive()?;
        let (_guard, ()) = self.begin_removal(|memory| memory.remove_all());
        self.tier.clear().await;
        self.emit(CacheEventKind::Clear, None);
        debug!(region = %self.name, "Cleared");
        Ok(())
    }

    /// Shut the fence and run `f` against memory under it. Read-throughs that
    /// overlap the returned guard's lifetime will not promote.
    fn begin_removal<T>(&self, f: impl FnOnce(&dyn MemoryStore<K, V>) -> T) -> (RemovalGuard<'_>, T) {
        let mut fence = self.fence.lock();
        fence.epoch += 1;
        fence.active += 1;
        let out = f(self.memory.as_ref());
        drop(fence);
        (RemovalGuard { fence: &self.fence }, out)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sweeper support
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn memory(&self) -> &dyn MemoryStore<K, V> {
        self.memory.as_ref()
    }

    pub(crate) fn emit_for(&self, kind: CacheEventKind, key: &K) {
        self.emit(kind, Some(key));
    }

    /// Start the periodic expiration sweeper at the configured interval.
    /// Returns false if one is already running or the region is disposed.
    pub fn start_sweeper(self: &Arc<Self>) -> bool {
        if !self.is_alive() {
            return false;
        }
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return false;
        }
        let handle = ExpirationSweeper::new(self).spawn(self.config.shrinker_interval());
        *slot = Some(handle);
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Wait until the spool worker has written everything queued so far.
    pub async fn wait_for_spool(&self) {
        self.tier.wait_idle().await;
    }

    pub fn stats(&self) -> RegionStats {
        RegionStats::new(
            &self.name,
            self.is_alive(),
            &self.counters,
            self.memory.stats(),
            self.tier.stats(),
            self.tier.names(),
        )
    }

    /// Shut the region down.
    ///
    /// Stops the sweeper, waits for queued spool work, flushes every live
    /// element to the first disk auxiliary that accepts it and disposes the
    /// auxiliaries. Fails with [`Error::DisposeTimeout`] if the flush does not
    /// finish within `dispose_timeout_ms`. Later calls return an empty report.
    pub async fn dispose(&self) -> Result<DisposeReport> {
        let _disposing = self.disposing.lock().await;
        if !self.alive.swap(false, Ordering::AcqRel) {
            return Ok(DisposeReport::default());
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.cancel();
        }
        info!(region = %self.name, size = self.memory.size(), "Disposing region");

        let flush = async {
            self.tier.wait_idle().await;
            let mut report = DisposeReport::default();
            let has_disk = self.tier.has_disk();
            for element in self.memory.drain() {
                if has_disk && element.attributes().is_spool() && self.tier.flush(&element).await {
                    report.flushed += 1;
                } else {
                    report.skipped += 1;
                }
            }
            report
        };

        let timeout = self.config.dispose_timeout();
        let report = match tokio::time::timeout(timeout, flush).await {
            Ok(report) => report,
            Err(_) => {
                self.spool.abort();
                warn!(region = %self.name, timeout_ms = self.config.dispose_timeout_ms, "Dispose timed out");
                return Err(Error::DisposeTimeout {
                    region: self.name.to_string(),
                    timeout_ms: self.config.dispose_timeout_ms,
                });
            }
        };

        let worker = self.spool.shutdown().await;
        self.tier.dispose_all().await;
        if let Err(e) = worker {
            return Err(Error::Flush {
                region: self.name.to_string(),
                reason: e.to_string(),
            });
        }
        info!(
            region = %self.name,
            flushed = report.flushed,
            skipped = report.skipped,
            "Region disposed"
        );
        Ok(report)
    }
}

impl<K: CacheKey, V: Send + Sync + 'static> fmt::Debug for Region<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("policy", &self.config.memory_policy)
            .field("max_objects", &self.config.max_objects)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
