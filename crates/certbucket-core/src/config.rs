//! Storage and lock configuration.
//!
//! [`StorageConfig`] has one required option, `bucket`, plus lock and
//! timeout tuning with defaults. Unknown options are rejected at parse
//! time, and [`StorageConfig::validate`] checks the values before any
//! backend is built.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CertStoreError;
use crate::Result;

/// Default lease duration: 60 seconds.
const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Default renewal interval: 20 seconds (three renewals per lease).
const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(20);

/// Default poll interval while waiting for a held lock: 1 second.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on lock acquisition: 5 minutes.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default per-operation timeout: 30 seconds.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of consecutive failed renewals before a lease is lost.
const DEFAULT_MAX_RENEW_FAILURES: u32 = 3;

/// Top-level configuration for a certbucket storage instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Bucket identifier: `gs://bucket[/root]`, `s3://bucket[/root]?region=..`,
    /// `memory://[root]`, `local://<path>`, or a bare GCS bucket name.
    pub bucket: String,

    /// Lock lease tuning.
    #[serde(default)]
    pub lock: LockConfig,

    /// Deadline applied to operations whose context carries none.
    #[serde(default = "default_operation_timeout", with = "duration_secs")]
    pub operation_timeout: Duration,
}

/// Lease and polling parameters for distributed locks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LockConfig {
    /// How long a lock record stays valid without renewal.
    #[serde(with = "duration_secs")]
    pub lease_duration: Duration,

    /// How often a holder pushes its lease forward.
    #[serde(with = "duration_secs")]
    pub renew_interval: Duration,

    /// Delay between attempts while a lock is held elsewhere.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// Upper bound on acquisition when the caller supplies no deadline.
    #[serde(with = "duration_secs")]
    pub acquire_timeout: Duration,

    /// Consecutive failed renewals after which the lease is considered lost.
    pub max_renew_failures: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            max_renew_failures: DEFAULT_MAX_RENEW_FAILURES,
        }
    }
}

impl LockConfig {
    /// Check lease parameters for consistency.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("lease_duration", self.lease_duration),
            ("renew_interval", self.renew_interval),
            ("poll_interval", self.poll_interval),
            ("acquire_timeout", self.acquire_timeout),
        ] {
            if value.is_zero() {
                return Err(CertStoreError::config(format!("lock.{name} must be > 0")));
            }
        }
        if self.renew_interval >= self.lease_duration / 2 {
            return Err(CertStoreError::config(format!(
                "lock.renew_interval ({:?}) must be less than half of lock.lease_duration ({:?})",
                self.renew_interval, self.lease_duration
            )));
        }
        if self.max_renew_failures == 0 {
            return Err(CertStoreError::config("lock.max_renew_failures must be > 0"));
        }
        Ok(())
    }
}

fn default_operation_timeout() -> Duration {
    DEFAULT_OPERATION_TIMEOUT
}

/// Where the bucket lives, parsed from [`StorageConfig::bucket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketLocation {
    /// Google Cloud Storage bucket with an optional root prefix.
    Gcs { bucket: String, root: String },
    /// S3-compatible bucket; the full URI carries region and endpoint.
    S3 { uri: String },
    /// Process-local in-memory store (tests and development).
    Memory { root: String },
    /// Local filesystem directory.
    Local { path: PathBuf },
}

impl StorageConfig {
    /// Create a configuration for `bucket` with default tuning.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            lock: LockConfig::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Parse and validate a JSON configuration object.
    ///
    /// # Example
    ///
    /// ```
    /// use certbucket_core::config::StorageConfig;
    ///
    /// let config = StorageConfig::from_json(r#"{"bucket": "gs://certs"}"#).unwrap();
    /// assert_eq!(config.bucket, "gs://certs");
    /// assert!(StorageConfig::from_json(r#"{"bucket": "b", "region": "x"}"#).is_err());
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CertStoreError::config(format!("invalid storage configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every option. Called by provisioning; never defaults silently.
    pub fn validate(&self) -> Result<()> {
        self.location()?;
        self.lock.validate()?;
        if self.operation_timeout.is_zero() {
            return Err(CertStoreError::config("operation_timeout must be > 0"));
        }
        Ok(())
    }

    /// Parse the bucket identifier into a [`BucketLocation`].
    pub fn location(&self) -> Result<BucketLocation> {
        let bucket = self.bucket.trim();
        if bucket.is_empty() {
            return Err(CertStoreError::config("bucket must not be empty"));
        }

        if let Some(rest) = bucket.strip_prefix("gs://") {
            let (name, root) = split_bucket(rest);
            if name.is_empty() {
                return Err(CertStoreError::config(format!(
                    "GCS URI must include a bucket name: {bucket}"
                )));
            }
            return Ok(BucketLocation::Gcs {
                bucket: name.to_string(),
                root: root.to_string(),
            });
        }
        if bucket.starts_with("s3://") {
            return Ok(BucketLocation::S3 {
                uri: bucket.to_string(),
            });
        }
        if let Some(rest) = bucket.strip_prefix("memory://") {
            return Ok(BucketLocation::Memory {
                root: rest.trim_matches('/').to_string(),
            });
        }
        if let Some(path) = bucket.strip_prefix("local://") {
            if path.is_empty() {
                return Err(CertStoreError::config("local:// URI must include a path"));
            }
            return Ok(BucketLocation::Local {
                path: PathBuf::from(path),
            });
        }
        if bucket.contains("://") {
            return Err(CertStoreError::config(format!(
                "unsupported bucket scheme: {bucket}"
            )));
        }
        if !is_valid_gcs_bucket_name(bucket) {
            return Err(CertStoreError::config(format!(
                "invalid bucket name: {bucket}"
            )));
        }
        Ok(BucketLocation::Gcs {
            bucket: bucket.to_string(),
            root: String::new(),
        })
    }
}

fn split_bucket(rest: &str) -> (&str, &str) {
    match rest.split_once('/') {
        Some((name, root)) => (name, root.trim_matches('/')),
        None => (rest, ""),
    }
}

/// GCS naming rules: 3–222 characters of lowercase letters, digits, `-`,
/// `_` and `.`, starting and ending with a letter or digit.
fn is_valid_gcs_bucket_name(name: &str) -> bool {
    let len_ok = (3..=222).contains(&name.len());
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    let ends_ok = name
        .chars()
        .next()
        .zip(name.chars().last())
        .map(|(a, b)| a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric())
        .unwrap_or(false);
    len_ok && chars_ok && ends_ok
}

/// Serialise a [`Duration`] as seconds, fractional where needed
/// (`60`, `0.25`).
mod duration_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {secs}: {e}")))
    }
}
