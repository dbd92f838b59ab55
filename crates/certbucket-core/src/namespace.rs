//! Mapping between logical keys and object names.
//!
//! Data objects live at `{root}/{key}`; lock records live in the reserved
//! `{root}/_locks/` subtree with a `.lock` suffix. The two never overlap
//! because no data key may begin with the [`LOCK_NAMESPACE`] segment.

use crate::types::{LogicalKey, DELIMITER};

/// First segment reserved for lock records.
pub const LOCK_NAMESPACE: &str = "_locks";

/// Suffix appended to lock object names.
pub const LOCK_SUFFIX: &str = ".lock";

/// Maps logical keys onto object names under an optional root prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    root: String,
}

impl Namespace {
    /// Create a namespace rooted at `root` (leading and trailing `/` are
    /// ignored; empty means the bucket root).
    pub fn new(root: impl AsRef<str>) -> Self {
        Self {
            root: root.as_ref().trim_matches(DELIMITER).to_string(),
        }
    }

    /// The root prefix, without trailing delimiter.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Whether `key` falls inside the reserved lock namespace.
    pub fn is_reserved(key: &LogicalKey) -> bool {
        key.first_segment() == LOCK_NAMESPACE
    }

    /// Object name for a data key.
    pub fn to_object_id(&self, key: &LogicalKey) -> String {
        self.join(key.as_str())
    }

    /// Logical key for an object name; the exact inverse of
    /// [`to_object_id`](Self::to_object_id).
    ///
    /// Returns `None` for names outside the root, inside the lock
    /// namespace, or that are not valid keys (such as empty names).
    pub fn from_object_id(&self, object_id: &str) -> Option<LogicalKey> {
        let relative = if self.root.is_empty() {
            object_id
        } else {
            object_id
                .strip_prefix(self.root.as_str())?
                .strip_prefix(DELIMITER)?
        };
        let key = LogicalKey::parse(relative).ok()?;
        if Self::is_reserved(&key) {
            return None;
        }
        Some(key)
    }

    /// Object name of the lock record for a data key.
    pub fn lock_object_id(&self, key: &LogicalKey) -> String {
        self.join(&format!("{LOCK_NAMESPACE}/{key}{LOCK_SUFFIX}"))
    }

    /// Object-name prefix for a logical listing prefix.
    pub fn object_prefix(&self, prefix: &str) -> String {
        if self.root.is_empty() {
            prefix.to_string()
        } else if prefix.is_empty() {
            format!("{}{}", self.root, DELIMITER)
        } else {
            format!("{}{}{}", self.root, DELIMITER, prefix)
        }
    }

    fn join(&self, relative: &str) -> String {
        if self.root.is_empty() {
            relative.to_string()
        } else {
            format!("{}{}{}", self.root, DELIMITER, relative)
        }
    }
}

/// Whether `object_name` belongs to a listing of `prefix`.
///
/// With a delimiter, names whose remainder after the prefix contains the
/// delimiter belong to a deeper "directory" and are excluded, mirroring the
/// common-prefix semantics of object stores. Empty names never match.
pub fn matches_prefix(object_name: &str, prefix: &str, delimiter: Option<char>) -> bool {
    if object_name.is_empty() {
        return false;
    }
    let Some(rest) = object_name.strip_prefix(prefix) else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }
    match delimiter {
        Some(d) => !rest.contains(d),
        None => true,
    }
}

/// The directory part of a listing prefix: everything up to the last
/// delimiter, without the delimiter itself.
///
/// Providers list by whole path segments, so `acme/exa` is listed from
/// `acme` and narrowed with [`matches_prefix`].
pub fn list_base(prefix: &str) -> &str {
    match prefix.rfind(DELIMITER) {
        Some(idx) => &prefix[..idx],
        None => "",
    }
}
