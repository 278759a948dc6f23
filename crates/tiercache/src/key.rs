//! Cache key contract and hierarchical key matching.
//!
//! Two kinds of keys address a whole subtree of a region:
//! - a string ending in the region's hierarchy delimiter (`"root:"` covers
//!   `"root:0:key"`, `"root:1:key"`, ...)
//! - a [`GroupAttrName`] without an attribute (covers every attribute of the group)

use std::borrow::Cow;
use std::fmt;
use std::hash::Hash;

/// Keys stored in a region.
pub trait CacheKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Whether the key may be stored. Invalid keys are rejected by `put`.
    fn is_valid(&self) -> bool {
        true
    }

    /// Whether this key names a subtree rather than a single entry.
    fn is_hierarchy_root(&self, _delimiter: char) -> bool {
        false
    }

    /// Whether this key lies under `root`, which must be a hierarchy root.
    fn is_descendant_of(&self, _root: &Self, _delimiter: char) -> bool {
        false
    }

    /// Text matched against `get_matching` patterns.
    fn match_text(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }
}

impl CacheKey for String {
    fn is_valid(&self) -> bool {
        !self.is_empty()
    }

    fn is_hierarchy_root(&self, delimiter: char) -> bool {
        self.ends_with(delimiter)
    }

    fn is_descendant_of(&self, root: &Self, _delimiter: char) -> bool {
        self.starts_with(root.as_str())
    }

    fn match_text(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

macro_rules! flat_key {
    ($($ty:ty),*) => {
        $(impl CacheKey for $ty {})*
    };
}

flat_key!(u32, u64, i32, i64, usize);

/// Identifies a group of related entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub String);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A key inside a group. Without an attribute it addresses the whole group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAttrName {
    pub group: GroupId,
    pub attr: Option<String>,
}

impl GroupAttrName {
    /// Key for one attribute of a group.
    pub fn new(group: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            group: GroupId(group.into()),
            attr: Some(attr.into()),
        }
    }

    /// Wildcard key covering every attribute of a group.
    pub fn group(group: impl Into<String>) -> Self {
        Self {
            group: GroupId(group.into()),
            attr: None,
        }
    }
}

impl fmt::Display for GroupAttrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attr {
            Some(attr) => write!(f, "{}:{}", self.group, attr),
            None => write!(f, "{}:*", self.group),
        }
    }
}

impl CacheKey for GroupAttrName {
    fn is_valid(&self) -> bool {
        !self.group.0.is_empty() && self.attr.is_some()
    }

    fn is_hierarchy_root(&self, _delimiter: char) -> bool {
        self.attr.is_none()
    }

    fn is_descendant_of(&self, root: &Self, _delimiter: char) -> bool {
        self.group == root.group && self.attr.is_some()
    }
}
