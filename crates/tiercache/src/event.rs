//! Structured events emitted by regions.
//!
//! The core has no log format of its own: every observable action is handed
//! to an [`EventSink`]. [`TracingSink`] forwards events to `tracing`.

use std::fmt;

use tracing::{debug, trace};

/// Element-level events, mostly about expiration and spilling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementEventType {
    /// Max life exceeded, detected by the sweeper.
    ExceededMaxLifeBackground,
    /// Max life exceeded, detected by a read.
    ExceededMaxLifeOnRequest,
    /// Idle time exceeded, detected by the sweeper.
    ExceededIdleTimeBackground,
    /// Idle time exceeded, detected by a read.
    ExceededIdleTimeOnRequest,
    /// Element was handed to a disk auxiliary.
    SpooledDiskAvailable,
    /// Element was evicted but no disk auxiliary accepted it.
    SpooledDiskNotAvailable,
    /// Element was evicted but its attributes forbid spooling.
    SpooledNotAllowed,
    /// Element was evicted while the spool queue was full. It stays
    /// readable in flight and is written once the queue has room.
    SpoolQueueFull,
}

impl fmt::Display for ElementEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementEventType::ExceededMaxLifeBackground => "exceeded_max_life_background",
            ElementEventType::ExceededMaxLifeOnRequest => "exceeded_max_life_on_request",
            ElementEventType::ExceededIdleTimeBackground => "exceeded_idle_time_background",
            ElementEventType::ExceededIdleTimeOnRequest => "exceeded_idle_time_on_request",
            ElementEventType::SpooledDiskAvailable => "spooled_disk_available",
            ElementEventType::SpooledDiskNotAvailable => "spooled_disk_not_available",
            ElementEventType::SpooledNotAllowed => "spooled_not_allowed",
            ElementEventType::SpoolQueueFull => "spool_queue_full",
        };
        f.write_str(name)
    }
}

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitTier {
    Memory,
    /// Queued for the spool worker but not yet written.
    InFlight,
    Auxiliary,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    Put,
    Hit(HitTier),
    Miss,
    Remove,
    Clear,
    /// Capacity-driven eviction from the memory tier.
    Evicted,
    /// Idle-driven demotion by the sweeper.
    Demoted,
    Element(ElementEventType),
}

/// A single event. Borrowed so emitting is allocation-free.
#[derive(Clone, Copy)]
pub struct CacheEvent<'a> {
    pub region: &'a str,
    pub kind: CacheEventKind,
    pub key: Option<&'a dyn fmt::Display>,
}

impl fmt::Debug for CacheEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEvent")
            .field("region", &self.region)
            .field("kind", &self.kind)
            .field("key", &self.key.map(|k| k.to_string()))
            .finish()
    }
}

/// Receives events from regions. Must be cheap; it runs on the caller's thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &CacheEvent<'_>);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &CacheEvent<'_>) {}
}

/// Renders an optional key lazily, only when the log level is enabled.
struct KeyField<'a>(Option<&'a dyn fmt::Display>);

impl fmt::Display for KeyField<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(key) => key.fmt(f),
            None => Ok(()),
        }
    }
}

/// Forwards events to `tracing`: element events at debug, the rest at trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &CacheEvent<'_>) {
        let key = KeyField(event.key);
        match event.kind {
            CacheEventKind::Element(element_event) => {
                debug!(region = %event.region, key = %key, event = %element_event, "Element event");
            }
            CacheEventKind::Evicted | CacheEventKind::Demoted => {
                debug!(region = %event.region, key = %key, kind = ?event.kind, "Element left memory");
            }
            kind => {
                trace!(region = %event.region, key = %key, kind = ?kind, "Cache event");
            }
        }
    }
}
