//! Secondary stores behind the memory tier.
//!
//! Auxiliaries are external collaborators: disk stores, lateral peers and
//! remote servers. The region only talks to them through [`Auxiliary`], and
//! every failure is logged and treated as "no effect".

mod map;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::key::CacheKey;
use crate::memory::ElementRef;

pub use map::MapAuxiliary;

/// Class of an auxiliary; drives spill, write-through and matching rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxiliaryKind {
    /// Local secondary storage. Receives spills and the dispose flush.
    Disk,
    /// Peer caches on other nodes.
    Lateral,
    /// A remote cache server.
    Remote,
}

impl AuxiliaryKind {
    /// Whether `local_*` operations skip this class.
    pub fn is_distributed(&self) -> bool {
        matches!(self, AuxiliaryKind::Lateral | AuxiliaryKind::Remote)
    }
}

impl fmt::Display for AuxiliaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuxiliaryKind::Disk => write!(f, "disk"),
            AuxiliaryKind::Lateral => write!(f, "lateral"),
            AuxiliaryKind::Remote => write!(f, "remote"),
        }
    }
}

/// Failure reported by an auxiliary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuxiliaryError {
    /// Storage or transport I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The auxiliary is not accepting requests.
    #[error("Auxiliary unavailable: {0}")]
    Unavailable(String),

    /// The auxiliary refused this element (e.g. it is full).
    #[error("Element rejected: {0}")]
    Rejected(String),
}

/// Result type for auxiliary operations.
pub type AuxiliaryResult<T> = std::result::Result<T, AuxiliaryError>;

/// A secondary store.
///
/// `remove` receives hierarchy roots unchanged together with the region's
/// hierarchy delimiter; implementations apply the same subtree semantics as
/// the memory tier.
#[async_trait]
pub trait Auxiliary<K, V>: Send + Sync
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    /// Name used in logs and stats.
    fn name(&self) -> &str;

    fn kind(&self) -> AuxiliaryKind;

    async fn get(&self, key: &K) -> AuxiliaryResult<Option<ElementRef<K, V>>>;

    async fn update(&self, element: ElementRef<K, V>) -> AuxiliaryResult<()>;

    async fn remove(&self, key: &K, delimiter: char) -> AuxiliaryResult<bool>;

    async fn remove_all(&self) -> AuxiliaryResult<()>;

    async fn get_matching(&self, pattern: &Regex) -> AuxiliaryResult<HashMap<K, ElementRef<K, V>>>;

    /// Release resources. Called once, after the region's dispose flush.
    async fn dispose(&self) -> AuxiliaryResult<()> {
        Ok(())
    }
}

/// Shared auxiliary handle.
pub type AuxiliaryRef<K, V> = Arc<dyn Auxiliary<K, V>>;
