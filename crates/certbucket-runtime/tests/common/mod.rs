//! Shared test support: a backend wrapper that injects faults.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use certbucket_core::error::CertStoreError;
use certbucket_core::storage::{BackendCapabilities, ObjectBackend};
use certbucket_core::types::{ObjectMeta, ObjectVersion};
use certbucket_core::Result;

/// How an operation misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Fault {
    None = 0,
    /// Fail with a storage error.
    Fail = 1,
    /// Never complete.
    Hang = 2,
}

impl Fault {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Fault::Fail,
            2 => Fault::Hang,
            _ => Fault::None,
        }
    }
}

/// Delegates to an inner backend, with switchable faults on the
/// conditional replace and metadata paths.
pub struct FaultyBackend {
    inner: Arc<dyn ObjectBackend>,
    replace: AtomicU8,
    head: AtomicU8,
}

impl FaultyBackend {
    pub fn new(inner: Arc<dyn ObjectBackend>) -> Self {
        Self {
            inner,
            replace: AtomicU8::new(Fault::None as u8),
            head: AtomicU8::new(Fault::None as u8),
        }
    }

    pub fn set_replace_fault(&self, fault: Fault) {
        self.replace.store(fault as u8, Ordering::SeqCst);
    }

    pub fn set_head_fault(&self, fault: Fault) {
        self.head.store(fault as u8, Ordering::SeqCst);
    }

    async fn inject(slot: &AtomicU8, op: &str) -> Result<()> {
        match Fault::from_u8(slot.load(Ordering::SeqCst)) {
            Fault::None => Ok(()),
            Fault::Fail => Err(CertStoreError::storage_msg(format!("{op}: injected failure"))),
            Fault::Hang => std::future::pending::<Result<()>>().await,
        }
    }
}

#[async_trait]
impl ObjectBackend for FaultyBackend {
    async fn put(&self, key: &str, data: Bytes) -> Result<ObjectVersion> {
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.inner.get(key).await
    }

    async fn get_versioned(&self, key: &str) -> Result<(Bytes, ObjectMeta)> {
        self.inner.get_versioned(key).await
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        Self::inject(&self.head, "head").await?;
        self.inner.head(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    fn list<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> Result<Option<ObjectVersion>> {
        self.inner.put_if_not_exists(key, data).await
    }

    async fn put_if_matches(
        &self,
        key: &str,
        data: Bytes,
        expected: &ObjectVersion,
    ) -> Result<Option<ObjectVersion>> {
        Self::inject(&self.replace, "put_if_matches").await?;
        self.inner.put_if_matches(key, data, expected).await
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.inner.capabilities()
    }
}
