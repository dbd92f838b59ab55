//! Cloud object storage backend.
//!
//! [`CloudBackend`] implements the [`ObjectBackend`] trait using the
//! `object_store` crate, supporting Google Cloud Storage, any S3-compatible
//! endpoint (AWS S3, MinIO, Ceph) and an in-memory store for tests.
//!
//! Conditional writes use `put_opts` with `PutMode::Create`, which maps to
//! `If-None-Match: *` on S3 and `ifGenerationMatch=0` on GCS, and
//! `PutMode::Update`, which conditions the write on the entity tag or
//! generation observed by the last read.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, PutResult, UpdateVersion};
use tracing::{debug, instrument};

use certbucket_core::config::BucketLocation;
use certbucket_core::error::CertStoreError;
use certbucket_core::storage::ObjectBackend;
use certbucket_core::types::{ObjectMeta, ObjectVersion};
use certbucket_core::Result;

/// An [`ObjectBackend`] backed by any `object_store` implementation.
///
/// Keys are used verbatim as object names; the bucket root prefix parsed
/// from the URI is exposed through [`root`](CloudBackend::root) for the
/// caller's namespace mapping.
pub struct CloudBackend {
    store: Box<dyn ObjectStore>,
    root: String,
}

impl CloudBackend {
    /// Create a backend for a parsed bucket location.
    ///
    /// Local filesystem locations are not handled here; use
    /// [`LocalBackend`](crate::LocalBackend) instead.
    pub fn from_location(location: &BucketLocation) -> Result<Self> {
        match location {
            BucketLocation::Gcs { bucket, root } => Self::gcs(bucket, root),
            BucketLocation::S3 { uri } => Self::s3(uri),
            BucketLocation::Memory { root } => Ok(Self::in_memory(root)),
            BucketLocation::Local { path } => Err(CertStoreError::config(format!(
                "local path {} requires LocalBackend",
                path.display()
            ))),
        }
    }

    /// Create a Google Cloud Storage backend.
    ///
    /// Credentials are taken from the environment
    /// (`GOOGLE_SERVICE_ACCOUNT`, `GOOGLE_APPLICATION_CREDENTIALS`, or the
    /// metadata server).
    pub fn gcs(bucket: &str, root: &str) -> Result<Self> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| {
                CertStoreError::Config {
                    message: format!("Failed to create GCS client for bucket {bucket}: {e}"),
                }
            })?;

        debug!(bucket = %bucket, root = %root, "GCS backend initialised");

        Ok(Self {
            store: Box::new(store),
            root: root.to_string(),
        })
    }

    /// Create a backend from an S3 URI.
    ///
    /// # URI Format
    ///
    /// `s3://bucket/prefix?region=us-east-1&endpoint=http://minio:9000`
    ///
    /// Environment variables `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and `AWS_REGION` are used as fallbacks for credentials and region.
    /// Conditional replace is requested via ETag matching.
    pub fn s3(uri: &str) -> Result<Self> {
        let (bucket, prefix) = parse_s3_uri(uri)?;

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&bucket)
            .with_conditional_put(S3ConditionalPut::ETagMatch);

        if let Some(region) = extract_query_param(uri, "region") {
            builder = builder.with_region(&region);
        }

        // MinIO and other S3-compatible services
        if let Some(endpoint) = extract_query_param(uri, "endpoint") {
            builder = builder.with_endpoint(&endpoint).with_allow_http(true);
        }

        let store = builder.build().map_err(|e| CertStoreError::Config {
            message: format!("Failed to create S3 client for {uri}: {e}"),
        })?;

        debug!(bucket = %bucket, root = %prefix, "S3 backend initialised");

        Ok(Self {
            store: Box::new(store),
            root: prefix,
        })
    }

    /// Create a process-local in-memory backend.
    pub fn in_memory(root: &str) -> Self {
        Self {
            store: Box::new(InMemory::new()),
            root: root.to_string(),
        }
    }

    /// Wrap an existing `object_store` implementation.
    pub fn with_store(store: Box<dyn ObjectStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    /// The root prefix inside the bucket (empty for the bucket root).
    pub fn root(&self) -> &str {
        &self.root
    }

    async fn put_with_mode(
        &self,
        path: &ObjectPath,
        data: Bytes,
        mode: PutMode,
    ) -> std::result::Result<PutResult, object_store::Error> {
        let opts = PutOptions {
            mode,
            ..Default::default()
        };
        self.store
            .put_opts(path, PutPayload::from(data), opts)
            .await
    }
}

#[async_trait]
impl ObjectBackend for CloudBackend {
    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> Result<ObjectVersion> {
        let result = self
            .store
            .put(&object_path(key)?, PutPayload::from(data))
            .await
            .map_err(|e| CertStoreError::storage(format!("put failed for {key}"), e))?;
        Ok(version_of(&result))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let (bytes, _) = self.get_versioned(key).await?;
        Ok(bytes)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get_versioned(&self, key: &str) -> Result<(Bytes, ObjectMeta)> {
        let result = self
            .store
            .get(&object_path(key)?)
            .await
            .map_err(|e| translate(key, "get", e))?;
        let meta = convert_meta(&result.meta);
        // The body is streamed separately; a failure here is never absence.
        let bytes = result
            .bytes()
            .await
            .map_err(|e| CertStoreError::storage(format!("reading body of {key} failed"), e))?;
        Ok((bytes, meta))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        let meta = self
            .store
            .head(&object_path(key)?)
            .await
            .map_err(|e| translate(key, "head", e))?;
        Ok(convert_meta(&meta))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = object_path(key)?;
        // S3 and the in-memory store delete idempotently, so absence is
        // established with a head request first.
        self.store
            .head(&path)
            .await
            .map_err(|e| translate(key, "delete", e))?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| translate(key, "delete", e))?;
        debug!("Deleted {}", key);
        Ok(())
    }

    fn list<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<ObjectMeta>> {
        let prefix = prefix.trim_matches('/').to_string();
        let path = if prefix.is_empty() {
            None
        } else {
            match object_path(&prefix) {
                Ok(path) => Some(path),
                Err(e) => return stream::once(async move { Err(e) }).boxed(),
            }
        };
        let listing = self.store.list(path.as_ref());
        listing
            .map_ok(|meta| convert_meta(&meta))
            .map_err(move |e| {
                CertStoreError::storage(format!("list failed for prefix {prefix}"), e)
            })
            .boxed()
    }

    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> Result<Option<ObjectVersion>> {
        let path = object_path(key)?;
        match self.put_with_mode(&path, data, PutMode::Create).await {
            Ok(result) => Ok(Some(version_of(&result))),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(None),
            // Some S3-compatible stores return Precondition instead of AlreadyExists
            Err(object_store::Error::Precondition { .. }) => Ok(None),
            Err(e) => Err(CertStoreError::storage(
                format!("conditional create failed for {key}"),
                e,
            )),
        }
    }

    #[instrument(skip(self, data, expected), fields(key = %key, size = data.len()))]
    async fn put_if_matches(
        &self,
        key: &str,
        data: Bytes,
        expected: &ObjectVersion,
    ) -> Result<Option<ObjectVersion>> {
        if !expected.is_known() {
            return Err(CertStoreError::storage_msg(format!(
                "conditional replace of {key} needs a version but the store reported none"
            )));
        }
        let mode = PutMode::Update(UpdateVersion {
            e_tag: expected.e_tag.clone(),
            version: expected.version.clone(),
        });
        let path = object_path(key)?;
        match self.put_with_mode(&path, data, mode).await {
            Ok(result) => Ok(Some(version_of(&result))),
            Err(object_store::Error::Precondition { .. }) => Ok(None),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(CertStoreError::storage(
                format!("conditional replace failed for {key}"),
                e,
            )),
        }
    }
}

/// Object path for a key, taken verbatim.
///
/// `Path::from` would percent-encode characters such as `~`, `#` or `%`,
/// so listings would no longer return the names that were written.
fn object_path(key: &str) -> Result<ObjectPath> {
    ObjectPath::parse(key).map_err(|e| CertStoreError::InvalidKey {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Map a provider error, keeping "not found" as the distinguished absence.
fn translate(key: &str, op: &str, e: object_store::Error) -> CertStoreError {
    match e {
        object_store::Error::NotFound { .. } => CertStoreError::NotFound {
            key: key.to_string(),
        },
        other => CertStoreError::storage(format!("{op} failed for {key}"), other),
    }
}

fn convert_meta(meta: &object_store::ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        name: meta.location.as_ref().to_string(),
        size: meta.size as u64,
        last_modified: meta.last_modified,
        version: ObjectVersion {
            e_tag: meta.e_tag.clone(),
            version: meta.version.clone(),
        },
    }
}

fn version_of(result: &PutResult) -> ObjectVersion {
    ObjectVersion {
        e_tag: result.e_tag.clone(),
        version: result.version.clone(),
    }
}

/// Parse an S3 URI into (bucket, prefix).
///
/// `s3://bucket/prefix/path` → `("bucket", "prefix/path")`
/// `s3://bucket` → `("bucket", "")`
fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let stripped = uri
        .strip_prefix("s3://")
        .ok_or_else(|| CertStoreError::Config {
            message: format!("S3 URI must start with 's3://': {uri}"),
        })?;

    let path_part = stripped.split('?').next().unwrap_or(stripped);

    let mut parts = path_part.splitn(2, '/');
    let bucket = parts.next().unwrap_or("").to_string();
    let prefix = parts.next().unwrap_or("").trim_matches('/').to_string();

    if bucket.is_empty() {
        return Err(CertStoreError::Config {
            message: format!("S3 URI must include a bucket name: {uri}"),
        });
    }

    Ok((bucket, prefix))
}

/// Extract a query parameter value from a URI.
fn extract_query_param(uri: &str, param: &str) -> Option<String> {
    let query = uri.split('?').nth(1)?;
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if kv.next()? == param {
            return kv.next().map(|v| v.to_string());
        }
    }
    None
}
