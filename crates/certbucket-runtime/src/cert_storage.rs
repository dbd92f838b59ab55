//! The certificate storage facade.
//!
//! [`CertStorage`] is the single type the certificate manager talks to. It
//! composes the object backend, the namespace mapper and the lock manager
//! into the `lock / unlock / store / load / delete / exists / stat / list`
//! contract. It adds no retries and no business logic of its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use certbucket_core::config::{BucketLocation, StorageConfig};
use certbucket_core::context::Context;
use certbucket_core::error::CertStoreError;
use certbucket_core::namespace::{list_base, matches_prefix, Namespace};
use certbucket_core::storage::ObjectBackend;
use certbucket_core::types::{KeyInfo, LogicalKey, DELIMITER};
use certbucket_core::Result;
use certbucket_storage::cloud::CloudBackend;
use certbucket_storage::local::LocalBackend;

use crate::lock::{LockHandle, LockManager, LockState};

/// Storage for certificate material with fleet-wide locking.
///
/// All durable state lives in the object store. The only in-memory state is
/// the set of locks this instance currently holds, each with its lease
/// renewal task.
pub struct CertStorage {
    backend: Arc<dyn ObjectBackend>,
    namespace: Namespace,
    locks: LockManager,
    held: Mutex<HashMap<LogicalKey, LockHandle>>,
    operation_timeout: Duration,
}

impl CertStorage {
    /// Validate `config` and build the backend it names.
    ///
    /// `gs://`, `s3://` and `memory://` buckets use [`CloudBackend`];
    /// `local://` paths use [`LocalBackend`]; a bare name is a GCS bucket.
    pub async fn provision(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let location = config.location()?;

        let (backend, root): (Arc<dyn ObjectBackend>, String) = match &location {
            BucketLocation::Local { path } => (Arc::new(LocalBackend::new(path).await?), String::new()),
            other => {
                let backend = CloudBackend::from_location(other)?;
                let root = backend.root().to_string();
                (Arc::new(backend), root)
            }
        };

        info!(
            bucket = %config.bucket,
            root = %root,
            lease_secs = config.lock.lease_duration.as_secs(),
            "Certificate storage provisioned"
        );

        Ok(Self::with_backend(backend, Namespace::new(root), &config))
    }

    /// Build a facade over an existing backend.
    pub fn with_backend(
        backend: Arc<dyn ObjectBackend>,
        namespace: Namespace,
        config: &StorageConfig,
    ) -> Self {
        let locks = LockManager::new(Arc::clone(&backend), namespace.clone(), config.lock.clone());
        Self {
            backend,
            namespace,
            locks,
            held: Mutex::new(HashMap::new()),
            operation_timeout: config.operation_timeout,
        }
    }

    /// The namespace mapper in use.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The lock manager, for callers that want to hold [`LockHandle`]s
    /// directly instead of going through `lock`/`unlock`.
    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    fn op_ctx(&self, ctx: &Context) -> Context {
        ctx.or_timeout(self.operation_timeout)
    }

    fn data_key(&self, key: &str) -> Result<LogicalKey> {
        let key = LogicalKey::parse(key)?;
        if Namespace::is_reserved(&key) {
            return Err(CertStoreError::InvalidKey {
                key: key.to_string(),
                reason: "key lies in the reserved lock namespace".to_string(),
            });
        }
        Ok(key)
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    /// Acquire the fleet-wide lock named `key`, waiting while another
    /// holder has it. Bounded by the context deadline or the configured
    /// acquisition timeout.
    #[instrument(skip(self, ctx), fields(key = %key))]
    pub async fn lock(&self, ctx: &Context, key: &str) -> Result<()> {
        let key = LogicalKey::parse(key)?;
        let handle = self.locks.acquire(ctx, &key).await?;
        let previous = self.held.lock().await.insert(key.clone(), handle);
        if let Some(previous) = previous {
            // Only possible after the earlier lease was lost or abandoned.
            debug!(key = %key, state = ?previous.state(), "Replacing stale lock handle");
        }
        Ok(())
    }

    /// Release the lock named `key` if this instance holds it. Unlocking a
    /// key this instance does not hold is a no-op.
    #[instrument(skip(self, ctx), fields(key = %key))]
    pub async fn unlock(&self, ctx: &Context, key: &str) -> Result<()> {
        let key = LogicalKey::parse(key)?;
        let handle = self.held.lock().await.remove(&key);
        match handle {
            Some(handle) => {
                if handle.state() == LockState::Lost {
                    warn!(key = %key, "Unlocking a lock whose lease was already lost");
                }
                self.locks.release(&self.op_ctx(ctx), handle).await
            }
            None => {
                debug!(key = %key, "Unlock of a lock not held here");
                Ok(())
            }
        }
    }

    /// Watch the lease state of a lock held by this instance.
    pub async fn lock_state(&self, key: &str) -> Option<watch::Receiver<LockState>> {
        let key = LogicalKey::parse(key).ok()?;
        self.held.lock().await.get(&key).map(LockHandle::subscribe)
    }

    /// Release every lock this instance holds and stop their renewal tasks.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.held.lock().await.drain().collect();
        let ctx = Context::with_timeout(self.operation_timeout);
        for (key, handle) in handles {
            if let Err(e) = self.locks.release(&ctx, handle).await {
                warn!(key = %key, error = %e, "Failed to release lock during shutdown");
            }
        }
        info!("Certificate storage shut down");
    }

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------

    /// Create or replace the object at `key`.
    #[instrument(skip(self, ctx, value), fields(key = %key))]
    pub async fn store(&self, ctx: &Context, key: &str, value: impl Into<Bytes>) -> Result<()> {
        let key = self.data_key(key)?;
        let id = self.namespace.to_object_id(&key);
        let value = value.into();
        let size = value.len();
        self.op_ctx(ctx)
            .run("store", self.backend.put(&id, value))
            .await?;
        debug!(size, "Stored");
        Ok(())
    }

    /// Read the object at `key`. Absence is `NotFound`.
    #[instrument(skip(self, ctx), fields(key = %key))]
    pub async fn load(&self, ctx: &Context, key: &str) -> Result<Bytes> {
        let key = self.data_key(key)?;
        let id = self.namespace.to_object_id(&key);
        self.op_ctx(ctx)
            .run("load", self.backend.get(&id))
            .await
            .map_err(|e| relabel_not_found(e, &key))
    }

    /// Delete the object at `key`. Absence is `NotFound`.
    #[instrument(skip(self, ctx), fields(key = %key))]
    pub async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        let key = self.data_key(key)?;
        let id = self.namespace.to_object_id(&key);
        self.op_ctx(ctx)
            .run("delete", self.backend.delete(&id))
            .await
            .map_err(|e| relabel_not_found(e, &key))
    }

    /// Whether an object exists at `key`. `false` only on definite absence;
    /// any other failure is returned as an error.
    #[instrument(skip(self, ctx), fields(key = %key))]
    pub async fn exists(&self, ctx: &Context, key: &str) -> Result<bool> {
        let key = self.data_key(key)?;
        let id = self.namespace.to_object_id(&key);
        self.op_ctx(ctx).run("exists", self.backend.exists(&id)).await
    }

    /// Metadata for the object at `key`.
    #[instrument(skip(self, ctx), fields(key = %key))]
    pub async fn stat(&self, ctx: &Context, key: &str) -> Result<KeyInfo> {
        let key = self.data_key(key)?;
        let id = self.namespace.to_object_id(&key);
        let meta = self
            .op_ctx(ctx)
            .run("stat", self.backend.head(&id))
            .await
            .map_err(|e| relabel_not_found(e, &key))?;
        Ok(KeyInfo {
            key: key.to_string(),
            size: meta.size,
            modified: meta.last_modified,
            is_terminal: true,
        })
    }

    /// Lazily list keys starting with `prefix`.
    ///
    /// Non-recursive listings include only keys with no further `/` after
    /// the prefix. Lock records are never listed. The stream ends after the
    /// first error; items already yielded stand. Each pull is bounded by
    /// the context deadline.
    pub fn list<'a>(
        &'a self,
        ctx: &Context,
        prefix: &str,
        recursive: bool,
    ) -> BoxStream<'a, Result<String>> {
        let object_prefix = self.namespace.object_prefix(prefix);
        let delimiter = (!recursive).then_some(DELIMITER);
        let namespace = &self.namespace;

        let keys = self
            .backend
            .list(list_base(&object_prefix))
            .try_filter_map(move |meta| {
                let key = if matches_prefix(&meta.name, &object_prefix, delimiter) {
                    namespace.from_object_id(&meta.name).map(String::from)
                } else {
                    None
                };
                futures::future::ready(Ok(key))
            })
            .boxed();

        let ctx = self.op_ctx(ctx);
        stream::unfold((keys, ctx, false), |(mut keys, ctx, done)| async move {
            if done {
                return None;
            }
            match ctx.run("list", keys.try_next()).await {
                Ok(Some(key)) => Some((Ok(key), (keys, ctx, false))),
                Ok(None) => None,
                Err(e) => Some((Err(e), (keys, ctx, true))),
            }
        })
        .boxed()
    }

    /// Collect a listing into a vector.
    pub async fn list_all(&self, ctx: &Context, prefix: &str, recursive: bool) -> Result<Vec<String>> {
        self.list(ctx, prefix, recursive).try_collect().await
    }
}

/// Report absence under the logical key rather than the object name.
fn relabel_not_found(e: CertStoreError, key: &LogicalKey) -> CertStoreError {
    if e.is_not_found() {
        CertStoreError::not_found(key.as_str())
    } else {
        e
    }
}
