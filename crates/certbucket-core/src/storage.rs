//! The ObjectBackend trait: the single interface to the remote object store.
//!
//! Every byte that certbucket persists, certificate material and lock
//! records alike, goes through this trait. Implementations live in the
//! `certbucket-storage` crate: an `object_store`-based backend for GCS, S3
//! and in-memory stores, and a local filesystem backend.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::types::{ObjectMeta, ObjectVersion};
use crate::Result;

/// Which atomic primitives a backend can guarantee across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// `put_if_not_exists` is atomic for all clients of the store.
    pub atomic_create: bool,
    /// `put_if_matches` is atomic for all clients of the store.
    pub atomic_replace: bool,
}

impl BackendCapabilities {
    /// Both primitives are atomic store-wide.
    pub const FULL: Self = Self {
        atomic_create: true,
        atomic_replace: true,
    };
}

/// The object storage interface consumed by certbucket.
///
/// Keys are raw object names. Implementations must be `Send + Sync` for use
/// across async tasks, and must report absence as
/// [`CertStoreError::NotFound`](crate::CertStoreError::NotFound) and every
/// other failure as a distinct error.
///
/// # Conditional Writes
///
/// [`put_if_not_exists`](ObjectBackend::put_if_not_exists) and
/// [`put_if_matches`](ObjectBackend::put_if_matches) are the only
/// primitives the lock manager relies on for mutual exclusion. Losing a
/// race is reported as `Ok(None)`, never as an error.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Write an object, overwriting any existing one. Returns once the full
    /// payload is durable.
    async fn put(&self, key: &str, data: Bytes) -> Result<ObjectVersion>;

    /// Read an object.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Read an object together with its metadata and version token.
    async fn get_versioned(&self, key: &str) -> Result<(Bytes, ObjectMeta)>;

    /// Read an object's metadata without its content.
    async fn head(&self, key: &str) -> Result<ObjectMeta>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lazily list every object whose name starts with the directory
    /// `prefix` (empty for the whole store), following provider pagination.
    /// The stream ends after the first error.
    fn list<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<ObjectMeta>>;

    /// Atomic create-if-absent.
    ///
    /// Returns `Ok(Some(version))` if the object was created, `Ok(None)` if
    /// it already existed (no write performed).
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> Result<Option<ObjectVersion>>;

    /// Atomic conditional replace.
    ///
    /// Writes only if the object's current version equals `expected`.
    /// Returns `Ok(None)` if the version differs or the object is gone.
    async fn put_if_matches(
        &self,
        key: &str,
        data: Bytes,
        expected: &ObjectVersion,
    ) -> Result<Option<ObjectVersion>>;

    /// Check if an object exists. Returns `Ok(false)` only for a definite
    /// not-found answer from the store.
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The atomicity guarantees this backend provides.
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::FULL
    }
}
