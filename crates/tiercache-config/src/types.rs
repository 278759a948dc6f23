//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [default]               # applied to every region
//! [default.element]       # default element attribute template
//! [regions.users]         # per-region overrides (any subset of fields)
//! [regions.users.element]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default region configuration values.
pub mod defaults {
    pub const MAX_OBJECTS: usize = 1000;
    pub const SHRINKER_INTERVAL_SECS: u64 = 30;
    pub const SPOOL_QUEUE_CAPACITY: usize = 1024;
    pub const AUXILIARY_TIMEOUT_MS: u64 = 5_000;
    pub const DISPOSE_TIMEOUT_MS: u64 = 30_000;
    pub const HIERARCHY_DELIMITER: char = ':';
    /// Sentinel for "disabled" / "unlimited" integer settings.
    pub const DISABLED: i64 = -1;
}

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// Eviction policy used by a region's memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryPolicyKind {
    /// Recency ordered (least recently used is evicted first).
    #[default]
    Lru,
    /// Bounded strong-reference queue over a weakly retained index.
    #[serde(alias = "soft-reference")]
    Soft,
    /// Off-the-shelf ordered map with an eviction return value.
    #[serde(alias = "linked-hash-map")]
    HashOrdered,
}

impl MemoryPolicyKind {
    /// Canonical configuration name of the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPolicyKind::Lru => "lru",
            MemoryPolicyKind::Soft => "soft",
            MemoryPolicyKind::HashOrdered => "hash-ordered",
        }
    }
}

impl fmt::Display for MemoryPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryPolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(MemoryPolicyKind::Lru),
            "soft" | "soft-reference" => Ok(MemoryPolicyKind::Soft),
            "hash-ordered" | "linked-hash-map" => Ok(MemoryPolicyKind::HashOrdered),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

/// How disk-class auxiliaries are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskUsagePattern {
    /// Disk only receives elements evicted from memory.
    #[default]
    Swap,
    /// Disk also receives every put (write-through).
    Update,
}

// ─────────────────────────────────────────────────────────────────────────────
// Element attribute template
// ─────────────────────────────────────────────────────────────────────────────

/// Default attributes stamped on elements put without explicit attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementAttributesConfig {
    /// Absolute lifetime from creation in seconds (-1 disables).
    pub max_life_seconds: i64,
    /// Lifetime from last access in seconds (-1 disables).
    pub idle_time_seconds: i64,
    /// Disables all expiration checks.
    pub eternal: bool,
    /// Element may be spilled to disk auxiliaries.
    pub spool: bool,
    /// Element may be sent to lateral auxiliaries.
    pub lateral: bool,
    /// Element may be sent to remote auxiliaries.
    pub remote: bool,
}

impl Default for ElementAttributesConfig {
    fn default() -> Self {
        Self {
            max_life_seconds: defaults::DISABLED,
            idle_time_seconds: defaults::DISABLED,
            eternal: true,
            spool: true,
            lateral: true,
            remote: true,
        }
    }
}

/// Partial element template used by region overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_life_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_time_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eternal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spool: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lateral: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<bool>,
}

impl ElementOverrides {
    fn apply_to(&self, base: &ElementAttributesConfig) -> ElementAttributesConfig {
        ElementAttributesConfig {
            max_life_seconds: self.max_life_seconds.unwrap_or(base.max_life_seconds),
            idle_time_seconds: self.idle_time_seconds.unwrap_or(base.idle_time_seconds),
            eternal: self.eternal.unwrap_or(base.eternal),
            spool: self.spool.unwrap_or(base.spool),
            lateral: self.lateral.unwrap_or(base.lateral),
            remote: self.remote.unwrap_or(base.remote),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Region configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Fully resolved configuration of a single region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Capacity of the memory tier. Zero makes memory non-authoritative:
    /// every put spills straight to the auxiliaries.
    pub max_objects: usize,

    /// Eviction policy of the memory tier.
    pub memory_policy: MemoryPolicyKind,

    /// Whether a background expiration sweeper runs for this region.
    pub use_memory_shrinker: bool,

    /// Period of the sweeper.
    pub shrinker_interval_seconds: u64,

    /// Idle time after which the sweeper demotes an element to disk (-1 disables).
    pub max_memory_idle_time_seconds: i64,

    /// Maximum demotions per sweep (-1 is unlimited).
    pub max_spool_per_run: i64,

    /// Whether disk auxiliaries receive puts or only evictions.
    pub disk_usage_pattern: DiskUsagePattern,

    /// Separator marking hierarchical string keys (`"root:"` removes `"root:*"`).
    pub hierarchy_delimiter: char,

    /// Bound of the queue feeding the background spool worker.
    pub spool_queue_capacity: usize,

    /// Upper bound on a single auxiliary call.
    pub auxiliary_timeout_ms: u64,

    /// Upper bound on flushing memory during dispose.
    pub dispose_timeout_ms: u64,

    /// Default element attributes.
    pub element: ElementAttributesConfig,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            max_objects: defaults::MAX_OBJECTS,
            memory_policy: MemoryPolicyKind::default(),
            use_memory_shrinker: false,
            shrinker_interval_seconds: defaults::SHRINKER_INTERVAL_SECS,
            max_memory_idle_time_seconds: defaults::DISABLED,
            max_spool_per_run: defaults::DISABLED,
            disk_usage_pattern: DiskUsagePattern::default(),
            hierarchy_delimiter: defaults::HIERARCHY_DELIMITER,
            spool_queue_capacity: defaults::SPOOL_QUEUE_CAPACITY,
            auxiliary_timeout_ms: defaults::AUXILIARY_TIMEOUT_MS,
            dispose_timeout_ms: defaults::DISPOSE_TIMEOUT_MS,
            element: ElementAttributesConfig::default(),
        }
    }
}

impl RegionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory tier capacity.
    pub fn with_max_objects(mut self, max: usize) -> Self {
        self.max_objects = max;
        self
    }

    /// Set the memory policy.
    pub fn with_policy(mut self, policy: MemoryPolicyKind) -> Self {
        self.memory_policy = policy;
        self
    }

    /// Set the memory policy by configuration name.
    pub fn with_policy_name(self, name: &str) -> Result<Self> {
        Ok(self.with_policy(name.parse()?))
    }

    /// Enable the background sweeper with the given period.
    pub fn with_shrinker(mut self, interval: Duration) -> Self {
        self.use_memory_shrinker = true;
        self.shrinker_interval_seconds = interval.as_secs();
        self
    }

    /// Set the idle threshold for background demotion (-1 disables).
    pub fn with_max_memory_idle_seconds(mut self, seconds: i64) -> Self {
        self.max_memory_idle_time_seconds = seconds;
        self
    }

    /// Set the per-sweep demotion budget (-1 is unlimited).
    pub fn with_max_spool_per_run(mut self, budget: i64) -> Self {
        self.max_spool_per_run = budget;
        self
    }

    /// Set the disk usage pattern.
    pub fn with_disk_usage_pattern(mut self, pattern: DiskUsagePattern) -> Self {
        self.disk_usage_pattern = pattern;
        self
    }

    /// Set the character that ends a hierarchy root key.
    pub fn with_hierarchy_delimiter(mut self, delimiter: char) -> Self {
        self.hierarchy_delimiter = delimiter;
        self
    }

    /// Set the spool queue bound.
    pub fn with_spool_queue_capacity(mut self, capacity: usize) -> Self {
        self.spool_queue_capacity = capacity;
        self
    }

    /// Set the per-call auxiliary timeout.
    pub fn with_auxiliary_timeout(mut self, timeout: Duration) -> Self {
        self.auxiliary_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the dispose flush timeout.
    pub fn with_dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the default element attribute template.
    pub fn with_element(mut self, element: ElementAttributesConfig) -> Self {
        self.element = element;
        self
    }

    pub fn shrinker_interval(&self) -> Duration {
        Duration::from_secs(self.shrinker_interval_seconds)
    }

    pub fn auxiliary_timeout(&self) -> Duration {
        Duration::from_millis(self.auxiliary_timeout_ms)
    }

    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }

    /// Idle threshold for demotion, `None` when disabled.
    pub fn max_memory_idle_time(&self) -> Option<Duration> {
        u64::try_from(self.max_memory_idle_time_seconds)
            .ok()
            .map(Duration::from_secs)
    }

    /// Demotion budget per sweep, `None` when unlimited.
    pub fn spool_budget(&self) -> Option<usize> {
        usize::try_from(self.max_spool_per_run).ok()
    }

    /// Check that every setting is usable. `region` names the region in errors.
    pub fn validate(&self, region: &str) -> Result<()> {
        if self.spool_queue_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                region: region.to_string(),
                field: "spool_queue_capacity",
            });
        }
        if self.auxiliary_timeout_ms == 0 {
            return Err(invalid(region, "auxiliary_timeout_ms", "must be greater than zero"));
        }
        if self.dispose_timeout_ms == 0 {
            return Err(invalid(region, "dispose_timeout_ms", "must be greater than zero"));
        }
        if self.use_memory_shrinker && self.shrinker_interval_seconds == 0 {
            return Err(invalid(
                region,
                "shrinker_interval_seconds",
                "must be greater than zero when the shrinker is enabled",
            ));
        }
        for (field, value) in [
            ("max_memory_idle_time_seconds", self.max_memory_idle_time_seconds),
            ("max_spool_per_run", self.max_spool_per_run),
            ("element.max_life_seconds", self.element.max_life_seconds),
            ("element.idle_time_seconds", self.element.idle_time_seconds),
        ] {
            if value < defaults::DISABLED {
                return Err(invalid(
                    region,
                    field,
                    format!("{value} is below -1 (use -1 to disable)"),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(region: &str, field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        region: region.to_string(),
        field,
        reason: reason.into(),
    }
}

/// Partial region configuration; unset fields inherit from `[default]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_objects: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_policy: Option<MemoryPolicyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_memory_shrinker: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shrinker_interval_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_idle_time_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_spool_per_run: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_usage_pattern: Option<DiskUsagePattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy_delimiter: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spool_queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispose_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementOverrides>,
}

impl RegionOverrides {
    /// Resolve these overrides on top of a base configuration.
    pub fn apply_to(&self, base: &RegionConfig) -> RegionConfig {
        RegionConfig {
            max_objects: self.max_objects.unwrap_or(base.max_objects),
            memory_policy: self.memory_policy.unwrap_or(base.memory_policy),
            use_memory_shrinker: self.use_memory_shrinker.unwrap_or(base.use_memory_shrinker),
            shrinker_interval_seconds: self
                .shrinker_interval_seconds
                .unwrap_or(base.shrinker_interval_seconds),
            max_memory_idle_time_seconds: self
                .max_memory_idle_time_seconds
                .unwrap_or(base.max_memory_idle_time_seconds),
            max_spool_per_run: self.max_spool_per_run.unwrap_or(base.max_spool_per_run),
            disk_usage_pattern: self.disk_usage_pattern.unwrap_or(base.disk_usage_pattern),
            hierarchy_delimiter: self.hierarchy_delimiter.unwrap_or(base.hierarchy_delimiter),
            spool_queue_capacity: self.spool_queue_capacity.unwrap_or(base.spool_queue_capacity),
            auxiliary_timeout_ms: self.auxiliary_timeout_ms.unwrap_or(base.auxiliary_timeout_ms),
            dispose_timeout_ms: self.dispose_timeout_ms.unwrap_or(base.dispose_timeout_ms),
            element: match &self.element {
                Some(element) => element.apply_to(&base.element),
                None => base.element.clone(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Settings every region starts from.
    pub default: RegionConfig,

    /// Named region overrides.
    pub regions: BTreeMap<String, RegionOverrides>,
}

impl CacheConfig {
    /// Create a config where every region uses the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with the given default region settings.
    pub fn with_default(default: RegionConfig) -> Self {
        Self {
            default,
            regions: BTreeMap::new(),
        }
    }

    /// Add or replace the overrides of a named region.
    pub fn with_region(mut self, name: impl Into<String>, overrides: RegionOverrides) -> Self {
        self.regions.insert(name.into(), overrides);
        self
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Effective configuration of a region: its overrides on top of `[default]`.
    pub fn region(&self, name: &str) -> RegionConfig {
        match self.regions.get(name) {
            Some(overrides) => overrides.apply_to(&self.default),
            None => self.default.clone(),
        }
    }

    /// Names of regions with explicit overrides.
    pub fn region_names(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    /// Validate the default settings and every resolved region.
    pub fn validate(&self) -> Result<()> {
        self.default.validate("default")?;
        for name in self.regions.keys() {
            self.region(name).validate(name)?;
        }
        Ok(())
    }
}
