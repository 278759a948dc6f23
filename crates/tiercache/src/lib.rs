//! Region-based in-process cache.
//!
//! This crate provides named cache regions, each with:
//! - A capacity-bounded memory tier with a pluggable eviction policy
//!   (LRU, soft-reference style, or hash-ordered)
//! - Spill of evicted elements to secondary stores through a bounded
//!   background queue
//! - Read-through from secondary stores on a memory miss
//! - Hierarchical removal of key subtrees
//! - A periodic sweeper that expires and demotes idle elements
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tiercache::{MapAuxiliary, Region, RegionConfig};
//!
//! let disk = Arc::new(MapAuxiliary::disk("disk"));
//! let region = Region::builder("sessions", RegionConfig::new().with_max_objects(100))
//!     .with_auxiliary(disk)
//!     .build()?;
//!
//! region.put("user:42".to_string(), "data".to_string())?;
//! let element = region.get(&"user:42".to_string()).await;
//! ```

pub mod auxiliary;
mod element;
mod error;
mod event;
mod key;
mod manager;
pub mod memory;
mod region;
mod spool;
mod stats;
mod sweeper;

pub use auxiliary::{Auxiliary, AuxiliaryError, AuxiliaryKind, AuxiliaryRef, AuxiliaryResult, MapAuxiliary};
pub use element::{CacheElement, ElementAttributes, Expiry, now_millis};
pub use error::{Error, Error as CacheError, Result};
pub use event::{CacheEvent, CacheEventKind, ElementEventType, EventSink, HitTier, NoopSink, TracingSink};
pub use key::{CacheKey, GroupAttrName, GroupId};
pub use manager::{AuxiliaryFactory, CacheManager};
pub use memory::{ElementRef, MemoryStore};
pub use region::{DisposeReport, Region, RegionBuilder};
pub use stats::{MemoryStats, RegionStats, SpoolStats};
pub use sweeper::{ExpirationSweeper, SweepReport, SweeperHandle, SweeperState};

pub use tiercache_config::{
    CacheConfig, ConfigError, DiskUsagePattern, ElementAttributesConfig, MemoryPolicyKind, RegionConfig,
    RegionOverrides,
};
