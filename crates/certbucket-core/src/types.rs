//! Typed keys, identifiers and object metadata.
//!
//! [`LogicalKey`] is the consumer-facing hierarchical key. [`ObjectMeta`]
//! and [`ObjectVersion`] describe objects as the backend sees them, and
//! [`KeyInfo`] is the read-only projection returned to callers by `stat`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CertStoreError;
use crate::Result;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a new random identifier using UUID v4.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Return the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(
    /// Opaque token identifying the holder of a lock.
    LockOwner
);

/// Path separator for logical keys and object names.
pub const DELIMITER: char = '/';

/// A validated hierarchical key such as `acme/example.com/example.com.crt`.
///
/// Segments are non-empty, never `.` or `..`, and contain no control
/// characters. Keys are case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalKey(String);

impl LogicalKey {
    /// Parse and validate a logical key.
    pub fn parse(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if let Some(reason) = invalid_reason(&key) {
            return Err(CertStoreError::InvalidKey {
                key,
                reason: reason.to_string(),
            });
        }
        Ok(Self(key))
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the key's segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(DELIMITER)
    }

    /// The first segment of the key.
    pub fn first_segment(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }
}

fn invalid_reason(key: &str) -> Option<&'static str> {
    if key.is_empty() {
        return Some("key is empty");
    }
    if key.starts_with(DELIMITER) || key.ends_with(DELIMITER) {
        return Some("key must not start or end with '/'");
    }
    if key.chars().any(char::is_control) {
        return Some("key contains control characters");
    }
    for segment in key.split(DELIMITER) {
        match segment {
            "" => return Some("key contains an empty segment"),
            "." | ".." => return Some("key contains a relative segment"),
            _ => {}
        }
    }
    None
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LogicalKey {
    type Error = CertStoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for LogicalKey {
    type Error = CertStoreError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<LogicalKey> for String {
    fn from(key: LogicalKey) -> Self {
        key.0
    }
}

/// Opaque version token of a stored object, used for conditional replace.
///
/// Backends fill whichever of the two fields their provider exposes
/// (an entity tag, a generation number, or both).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    /// Entity tag reported by the provider.
    pub e_tag: Option<String>,
    /// Provider-specific version or generation identifier.
    pub version: Option<String>,
}

impl ObjectVersion {
    /// Whether the provider reported any usable version information.
    pub fn is_known(&self) -> bool {
        self.e_tag.is_some() || self.version.is_some()
    }
}

/// Metadata of a stored object as reported by a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full object name within the bucket.
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Version token for conditional replace.
    pub version: ObjectVersion,
}

/// Read-only metadata projection returned by `stat`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// The logical key.
    pub key: String,
    /// Content size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Always `true`: only leaf objects are modelled, directories are implicit.
    pub is_terminal: bool,
}
