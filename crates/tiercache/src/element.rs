//! Stored elements and their expiration metadata.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tiercache_config::ElementAttributesConfig;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sentinel disabling a lifetime check.
const DISABLED: i64 = -1;

/// Outcome of an expiration check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Still valid.
    Fresh,
    /// Older than `max_life_seconds` since creation.
    MaxLifeExceeded,
    /// Unread for longer than `idle_time_seconds`.
    IdleTimeExceeded,
}

impl Expiry {
    pub fn is_expired(&self) -> bool {
        !matches!(self, Expiry::Fresh)
    }
}

/// Expiration and routing metadata attached to every element.
#[derive(Debug)]
pub struct ElementAttributes {
    create_time: i64,
    last_access: AtomicI64,
    max_life_seconds: i64,
    idle_time_seconds: i64,
    eternal: bool,
    spool: bool,
    lateral: bool,
    remote: bool,
    size: usize,
}

impl Default for ElementAttributes {
    fn default() -> Self {
        Self::from_template(&ElementAttributesConfig::default())
    }
}

impl Clone for ElementAttributes {
    fn clone(&self) -> Self {
        Self {
            create_time: self.create_time,
            last_access: AtomicI64::new(self.last_access_time()),
            max_life_seconds: self.max_life_seconds,
            idle_time_seconds: self.idle_time_seconds,
            eternal: self.eternal,
            spool: self.spool,
            lateral: self.lateral,
            remote: self.remote,
            size: self.size,
        }
    }
}

impl ElementAttributes {
    /// Attributes created now from a configured template.
    pub fn from_template(template: &ElementAttributesConfig) -> Self {
        let now = now_millis();
        Self {
            create_time: now,
            last_access: AtomicI64::new(now),
            max_life_seconds: template.max_life_seconds,
            idle_time_seconds: template.idle_time_seconds,
            eternal: template.eternal,
            spool: template.spool,
            lateral: template.lateral,
            remote: template.remote,
            size: 0,
        }
    }

    /// Attributes from the built-in template: eternal, no lifetime limits.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_life_seconds(mut self, seconds: i64) -> Self {
        self.max_life_seconds = seconds;
        self
    }

    pub fn with_idle_time_seconds(mut self, seconds: i64) -> Self {
        self.idle_time_seconds = seconds;
        self
    }

    pub fn with_eternal(mut self, eternal: bool) -> Self {
        self.eternal = eternal;
        self
    }

    pub fn with_spool(mut self, spool: bool) -> Self {
        self.spool = spool;
        self
    }

    pub fn with_lateral(mut self, lateral: bool) -> Self {
        self.lateral = lateral;
        self
    }

    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    /// Best-effort serialized size, used only for reporting.
    pub fn with_size(mut self, bytes: usize) -> Self {
        self.size = bytes;
        self
    }

    /// Override the creation and last-access timestamps.
    pub fn with_create_time(mut self, millis: i64) -> Self {
        self.create_time = millis;
        self.last_access = AtomicI64::new(millis);
        self
    }

    pub fn create_time(&self) -> i64 {
        self.create_time
    }

    pub fn last_access_time(&self) -> i64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Record a read.
    pub fn touch(&self) {
        self.touch_at(now_millis());
    }

    pub(crate) fn touch_at(&self, millis: i64) {
        self.last_access.fetch_max(millis, Ordering::Relaxed);
    }

    pub fn max_life_seconds(&self) -> i64 {
        self.max_life_seconds
    }

    pub fn idle_time_seconds(&self) -> i64 {
        self.idle_time_seconds
    }

    pub fn is_eternal(&self) -> bool {
        self.eternal
    }

    pub fn is_spool(&self) -> bool {
        self.spool
    }

    pub fn is_lateral(&self) -> bool {
        self.lateral
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Evaluate the life and idle rules at `now` (epoch millis).
    ///
    /// Eternal elements are always fresh. The life rule is checked first.
    pub fn check_expiry(&self, now: i64) -> Expiry {
        if self.eternal {
            return Expiry::Fresh;
        }
        if self.max_life_seconds != DISABLED
            && now - self.create_time > self.max_life_seconds.saturating_mul(1000)
        {
            return Expiry::MaxLifeExceeded;
        }
        if self.idle_time_seconds != DISABLED
            && now - self.last_access_time() > self.idle_time_seconds.saturating_mul(1000)
        {
            return Expiry::IdleTimeExceeded;
        }
        Expiry::Fresh
    }

    /// Milliseconds since the last read.
    pub fn idle_millis(&self, now: i64) -> i64 {
        now - self.last_access_time()
    }
}

/// The stored unit: region, key, value and attributes.
///
/// Elements are shared as `Arc<CacheElement<K, V>>`; moving an element from
/// memory to an auxiliary hands over the same allocation.
pub struct CacheElement<K, V> {
    region: Arc<str>,
    key: K,
    value: V,
    attributes: ElementAttributes,
}

impl<K, V> CacheElement<K, V> {
    pub fn new(region: impl Into<Arc<str>>, key: K, value: V, attributes: ElementAttributes) -> Self {
        Self {
            region: region.into(),
            key,
            value,
            attributes,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn attributes(&self) -> &ElementAttributes {
        &self.attributes
    }
}

impl<K: fmt::Debug, V> fmt::Debug for CacheElement<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheElement")
            .field("region", &self.region)
            .field("key", &self.key)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}
