//! Asynchronous spill and write-through to auxiliaries.
//!
//! Foreground calls never wait on an auxiliary write. Evicted elements and
//! write-through copies are pushed onto a bounded queue drained by one worker
//! task per region. While a job is queued its element stays readable through
//! the in-flight lookaside map. A job that finds the queue full waits for room
//! on its own task; it is never dropped while the worker is running.
//!
//! `remove` and `clear` take the same gate the worker holds while writing, and
//! cancel queued jobs for the keys they touch. A job is only written if it is
//! still registered when the worker picks it up, so a removed key cannot be
//! written back by a stale job.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tiercache_config::{DiskUsagePattern, RegionConfig};
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace, warn};

use crate::auxiliary::{AuxiliaryKind, AuxiliaryRef, AuxiliaryResult};
use crate::event::{CacheEvent, CacheEventKind, ElementEventType, EventSink};
use crate::key::CacheKey;
use crate::memory::ElementRef;
use crate::stats::{SpoolCounters, SpoolStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    /// Evicted or demoted from memory; goes to the first disk auxiliary that accepts it.
    Spill,
    /// Copy of a fresh put for lateral/remote (and disk under the update pattern).
    WriteThrough,
}

/// What the worker does with a dequeued job.
enum JobState {
    Current,
    /// A newer element for the key is queued; only that one is written.
    Superseded,
    /// Removed or cleared after the job was queued.
    Cancelled,
}

struct SpoolJob<K, V> {
    seq: u64,
    kind: JobKind,
    element: ElementRef<K, V>,
}

/// Latest queued element for a key.
struct InFlight<K, V> {
    element: ElementRef<K, V>,
    /// Jobs with a lower sequence number were cancelled.
    since: u64,
    pending: usize,
}

/// The ordered auxiliary list plus everything the spool worker shares with
/// the region.
pub(crate) struct AuxiliaryTier<K: CacheKey, V: Send + Sync + 'static> {
    region: Arc<str>,
    auxiliaries: Vec<AuxiliaryRef<K, V>>,
    delimiter: char,
    timeout: Duration,
    disk_usage: DiskUsagePattern,
    sink: Arc<dyn EventSink>,
    gate: tokio::sync::Mutex<()>,
    inflight: Mutex<HashMap<K, InFlight<K, V>>>,
    next_seq: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
    counters: SpoolCounters,
}

impl<K, V> AuxiliaryTier<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    pub fn new(
        region: Arc<str>,
        auxiliaries: Vec<AuxiliaryRef<K, V>>,
        config: &RegionConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            region,
            auxiliaries,
            delimiter: config.hierarchy_delimiter,
            timeout: config.auxiliary_timeout(),
            disk_usage: config.disk_usage_pattern,
            sink,
            gate: tokio::sync::Mutex::new(()),
            inflight: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            counters: SpoolCounters::default(),
        }
    }

    /// `name (kind)` for every auxiliary, in order.
    pub fn names(&self) -> Vec<String> {
        self.auxiliaries
            .iter()
            .map(|aux| format!("{} ({})", aux.name(), aux.kind()))
            .collect()
    }

    pub fn has_disk(&self) -> bool {
        self.auxiliaries
            .iter()
            .any(|aux| aux.kind() == AuxiliaryKind::Disk)
    }

    pub fn stats(&self) -> SpoolStats {
        let in_flight = self.inflight.lock().len();
        self.counters.snapshot(in_flight)
    }

    fn emit(&self, event: ElementEventType, key: &K) {
        self.sink.emit(&CacheEvent {
            region: &self.region,
            kind: CacheEventKind::Element(event),
            key: Some(key),
        });
    }

    fn wants_write_through(&self, element: &ElementRef<K, V>) -> bool {
        self.auxiliaries
            .iter()
            .any(|aux| self.receives_write_through(aux.kind(), element))
    }

    fn receives_write_through(&self, kind: AuxiliaryKind, element: &ElementRef<K, V>) -> bool {
        let attributes = element.attributes();
        match kind {
            AuxiliaryKind::Disk => {
                self.disk_usage == DiskUsagePattern::Update && attributes.is_spool()
            }
            AuxiliaryKind::Lateral => attributes.is_lateral(),
            AuxiliaryKind::Remote => attributes.is_remote(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // In-flight bookkeeping
    // ─────────────────────────────────────────────────────────────────────

    /// Element queued for the worker under `key`, if any.
    pub fn in_flight(&self, key: &K) -> Option<ElementRef<K, V>> {
        self.inflight.lock().get(key).map(|entry| entry.element.clone())
    }

    /// Drop queued jobs for exactly this key.
    pub fn cancel(&self, key: &K) {
        self.inflight.lock().remove(key);
    }

    fn cancel_matching(&self, key: &K) {
        let mut inflight = self.inflight.lock();
        if key.is_hierarchy_root(self.delimiter) {
            inflight.retain(|candidate, _| !candidate.is_descendant_of(key, self.delimiter));
        } else {
            inflight.remove(key);
        }
    }

    fn register(inflight: &mut HashMap<K, InFlight<K, V>>, seq: u64, element: ElementRef<K, V>) {
        inflight
            .entry(element.key().clone())
            .and_modify(|entry| {
                entry.element = element.clone();
                entry.pending += 1;
            })
            .or_insert(InFlight {
                element,
                since: seq,
                pending: 1,
            });
    }

    fn job_state(&self, job: &SpoolJob<K, V>) -> JobState {
        match self.inflight.lock().get(job.element.key()) {
            Some(entry) if job.seq >= entry.since => {
                if Arc::ptr_eq(&entry.element, &job.element) {
                    JobState::Current
                } else {
                    JobState::Superseded
                }
            }
            _ => JobState::Cancelled,
        }
    }

    fn settle(&self, job: &SpoolJob<K, V>) {
        let mut inflight = self.inflight.lock();
        if let Some(entry) = inflight.get_mut(job.element.key())
            && job.seq >= entry.since
        {
            entry.pending = entry.pending.saturating_sub(1);
            if entry.pending == 0 {
                inflight.remove(job.element.key());
            }
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Resolve once no job is queued or being written.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Auxiliary calls
    // ─────────────────────────────────────────────────────────────────────

    /// Run one auxiliary call under the configured timeout. Failures are
    /// logged, counted and turned into `None`.
    async fn call<T>(
        &self,
        aux: &AuxiliaryRef<K, V>,
        op: &'static str,
        fut: impl Future<Output = AuxiliaryResult<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    region = %self.region,
                    auxiliary = %aux.name(),
                    op,
                    error = %e,
                    "Auxiliary call failed"
                );
                None
            }
            Err(_) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    region = %self.region,
                    auxiliary = %aux.name(),
                    op,
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "Auxiliary call timed out"
                );
                None
            }
        }
    }

    /// Read-through in configured order; first hit wins.
    pub async fn get(&self, key: &K, local_only: bool) -> Option<ElementRef<K, V>> {
        for aux in &self.auxiliaries {
            if local_only && aux.kind().is_distributed() {
                continue;
            }
            if let Some(Some(element)) = self.call(aux, "get", aux.get(key)).await {
                trace!(region = %self.region, auxiliary = %aux.name(), key = %key, "Auxiliary hit");
                return Some(element);
            }
        }
        None
    }

    /// Cancel queued jobs under `key` and propagate the removal.
    pub async fn remove(&self, key: &K, local_only: bool) -> bool {
        let _gate = self.gate.lock().await;
        self.cancel_matching(key);
        let mut removed = false;
        for aux in &self.auxiliaries {
            if local_only && aux.kind().is_distributed() {
                continue;
            }
            removed |= self.call(aux, "remove", aux.remove(key, self.delimiter)).await.unwrap_or(false);
        }
        removed
    }

    /// Cancel every queued job and empty every auxiliary.
    pub async fn clear(&self) {
        let _gate = self.gate.lock().await;
        self.inflight.lock().clear();
        for aux in &self.auxiliaries {
            self.call(aux, "remove_all", aux.remove_all()).await;
        }
    }

    /// Matches from the first disk and the first remote auxiliary.
    pub async fn get_matching(&self, pattern: &Regex) -> HashMap<K, ElementRef<K, V>> {
        let mut matches = HashMap::new();
        for kind in [AuxiliaryKind::Disk, AuxiliaryKind::Remote] {
            let Some(aux) = self.auxiliaries.iter().find(|aux| aux.kind() == kind) else {
                continue;
            };
            if let Some(found) = self.call(aux, "get_matching", aux.get_matching(pattern)).await {
                for (key, element) in found {
                    matches.entry(key).or_insert(element);
                }
            }
        }
        matches
    }

    /// Write to disk auxiliaries in order until one accepts.
    async fn write_disk(&self, element: &ElementRef<K, V>) -> bool {
        for aux in &self.auxiliaries {
            if aux.kind() != AuxiliaryKind::Disk {
                continue;
            }
            if self
                .call(aux, "update", aux.update(element.clone()))
                .await
                .is_some()
            {
                return true;
            }
        }
        false
    }

    async fn spill_now(&self, element: &ElementRef<K, V>) {
        if self.write_disk(element).await {
            self.counters.spooled.fetch_add(1, Ordering::Relaxed);
            self.emit(ElementEventType::SpooledDiskAvailable, element.key());
        } else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            self.emit(ElementEventType::SpooledDiskNotAvailable, element.key());
        }
    }

    async fn write_through_now(&self, element: &ElementRef<K, V>) {
        for aux in &self.auxiliaries {
            if self.receives_write_through(aux.kind(), element) {
                self.call(aux, "update", aux.update(element.clone())).await;
            }
        }
    }

    /// Write one element straight to disk, bypassing the queue. Used by the
    /// dispose flush.
    pub async fn flush(&self, element: &ElementRef<K, V>) -> bool {
        let _gate = self.gate.lock().await;
        let written = self.write_disk(element).await;
        if written {
            self.counters.spooled.fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    pub async fn dispose_all(&self) {
        for aux in &self.auxiliaries {
            self.call(aux, "dispose", aux.dispose()).await;
        }
    }

    async fn process(&self, job: SpoolJob<K, V>) {
        {
            let _gate = self.gate.lock().await;
            match self.job_state(&job) {
                JobState::Current => {
                    match job.kind {
                        JobKind::Spill => self.spill_now(&job.element).await,
                        JobKind::WriteThrough => self.write_through_now(&job.element).await,
                    }
                    self.settle(&job);
                }
                JobState::Superseded => {
                    trace!(region = %self.region, key = %job.element.key(), "Skipping superseded spool job");
                    self.settle(&job);
                }
                JobState::Cancelled => {
                    trace!(region = %self.region, key = %job.element.key(), "Skipping cancelled spool job");
                }
            }
        }
        self.finish_one();
    }
}

/// Deliver a job that found the queue full. The worker only stops once every
/// sender is gone, so shutdown still drains these.
async fn send_overflow<K, V>(
    tier: Arc<AuxiliaryTier<K, V>>,
    sender: mpsc::Sender<SpoolJob<K, V>>,
    job: SpoolJob<K, V>,
) where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    match sender.send(job).await {
        Ok(()) => {
            tier.counters.queued.fetch_add(1, Ordering::Relaxed);
        }
        Err(mpsc::error::SendError(job)) => {
            tier.settle(&job);
            tier.finish_one();
            tier.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(region = %tier.region, key = %job.element.key(), "Spool worker gone, dropping element");
        }
    }
}

async fn run_worker<K, V>(tier: Arc<AuxiliaryTier<K, V>>, mut jobs: mpsc::Receiver<SpoolJob<K, V>>)
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    debug!(region = %tier.region, "Spool worker started");
    while let Some(job) = jobs.recv().await {
        tier.process(job).await;
    }
    debug!(region = %tier.region, "Spool worker stopped");
}

/// Producer side of a region's spool worker.
pub(crate) struct SpoolQueue<K: CacheKey, V: Send + Sync + 'static> {
    tier: Arc<AuxiliaryTier<K, V>>,
    sender: RwLock<Option<mpsc::Sender<SpoolJob<K, V>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl<K, V> SpoolQueue<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn start(tier: Arc<AuxiliaryTier<K, V>>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let runtime = Handle::current();
        let worker = runtime.spawn(run_worker(tier.clone(), receiver));
        Self {
            tier,
            sender: RwLock::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            runtime,
        }
    }

    /// Queue an element that just left memory.
    pub fn spill(&self, element: ElementRef<K, V>) {
        if !element.attributes().is_spool() {
            self.tier.counters.dropped.fetch_add(1, Ordering::Relaxed);
            self.tier
                .emit(ElementEventType::SpooledNotAllowed, element.key());
            return;
        }
        if !self.tier.has_disk() {
            self.tier.counters.dropped.fetch_add(1, Ordering::Relaxed);
            self.tier
                .emit(ElementEventType::SpooledDiskNotAvailable, element.key());
            return;
        }
        self.enqueue(JobKind::Spill, element);
    }

    /// Queue write-through copies of a freshly put element.
    pub fn write_through(&self, element: ElementRef<K, V>) {
        if self.tier.wants_write_through(&element) {
            self.enqueue(JobKind::WriteThrough, element);
        }
    }

    fn enqueue(&self, kind: JobKind, element: ElementRef<K, V>) {
        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            self.tier.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(region = %self.tier.region, key = %element.key(), "Spool queue closed, dropping element");
            return;
        };

        // Registration and send happen under one lock so the worker cannot
        // see the job before it is registered.
        let mut inflight = self.tier.inflight.lock();
        let seq = self.tier.next_seq.fetch_add(1, Ordering::Relaxed);
        self.tier.pending.fetch_add(1, Ordering::AcqRel);
        let job = SpoolJob {
            seq,
            kind,
            element: element.clone(),
        };
        match sender.try_send(job) {
            Ok(()) => {
                AuxiliaryTier::register(&mut inflight, seq, element);
                self.tier.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                // Already out of memory: stays in flight until written.
                AuxiliaryTier::register(&mut inflight, seq, element);
                drop(inflight);
                self.tier.counters.overflowed.fetch_add(1, Ordering::Relaxed);
                debug!(region = %self.tier.region, key = %job.element.key(), "Spool queue full, waiting for room");
                self.tier
                    .emit(ElementEventType::SpoolQueueFull, job.element.key());
                self.runtime
                    .spawn(send_overflow(self.tier.clone(), sender.clone(), job));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                drop(inflight);
                self.tier.finish_one();
                self.tier.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Stop accepting jobs, let the worker drain the queue and wait for it.
    pub async fn shutdown(&self) -> Result<(), JoinError> {
        self.sender.write().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(region = %self.tier.region, error = %e, "Spool worker ended abnormally");
            return Err(e);
        }
        Ok(())
    }

    /// Stop accepting jobs and abort the worker without draining.
    pub fn abort(&self) {
        self.sender.write().take();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}
