//! Filesystem-backed storage backend for single-host deployments and tests.
//!
//! [`LocalBackend`] implements the [`ObjectBackend`] trait using the local
//! filesystem. Writes go to a temporary sibling file and are moved into
//! place, so readers never observe a partial object. Conditional creation
//! hard-links the finished temporary file to the target, which fails with
//! `EEXIST` if the target exists and is atomic across processes.
//!
//! Conditional replace is serialised by an in-process mutex only; two
//! processes sharing one directory can both win a replace race.
//! [`capabilities`](ObjectBackend::capabilities) reports this.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use certbucket_core::error::CertStoreError;
use certbucket_core::storage::{BackendCapabilities, ObjectBackend};
use certbucket_core::types::{ObjectMeta, ObjectVersion};
use certbucket_core::Result;

/// File-name prefix of in-flight temporary files; never listed.
const TMP_PREFIX: &str = ".certbucket-tmp-";

/// An [`ObjectBackend`] backed by the local filesystem.
///
/// All keys are mapped to paths under the configured `base_dir`.
/// Parent directories are created automatically on write.
#[derive(Debug)]
pub struct LocalBackend {
    base_dir: PathBuf,
    replace_lock: Mutex<()>,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await.map_err(|e| {
            CertStoreError::storage(
                format!("Failed to create base directory: {}", base_dir.display()),
                e,
            )
        })?;
        debug!(base_dir = %base_dir.display(), "LocalBackend initialised");
        Ok(Self {
            base_dir,
            replace_lock: Mutex::new(()),
        })
    }

    /// Return the full filesystem path for a storage key.
    fn key_to_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    /// Return the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write `data` to a fresh temporary file next to `path`.
    async fn write_temp(&self, path: &Path, data: &[u8]) -> Result<PathBuf> {
        let parent = path.parent().unwrap_or(&self.base_dir);
        fs::create_dir_all(parent).await.map_err(|e| {
            CertStoreError::storage(
                format!("Failed to create parent directories for {}", path.display()),
                e,
            )
        })?;
        let tmp = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
        fs::write(&tmp, data).await.map_err(|e| {
            CertStoreError::storage(format!("Failed to write {}", tmp.display()), e)
        })?;
        Ok(tmp)
    }

    /// Write `data` to `path`, replacing any existing file atomically.
    async fn write_replace(&self, path: &Path, data: &[u8]) -> Result<ObjectVersion> {
        let tmp = self.write_temp(path, data).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(CertStoreError::storage(
                format!("Failed to move {} into place", path.display()),
                e,
            ));
        }
        let metadata = fs::metadata(path).await.map_err(|e| {
            CertStoreError::storage(format!("Failed to stat {}", path.display()), e)
        })?;
        Ok(build_meta("", &metadata).version)
    }

    async fn stat_path(&self, path: &Path, key: &str) -> Result<ObjectMeta> {
        let metadata = fs::metadata(path).await.map_err(|e| io_error(key, "stat", e))?;
        if metadata.is_dir() {
            return Err(CertStoreError::not_found(key));
        }
        Ok(build_meta(key, &metadata))
    }
}

#[async_trait]
impl ObjectBackend for LocalBackend {
    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> Result<ObjectVersion> {
        let path = self.key_to_path(key);
        let version = self.write_replace(&path, &data).await?;
        debug!("Put {} bytes to {}", data.len(), key);
        Ok(version)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let (data, _) = self.get_versioned(key).await?;
        Ok(data)
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get_versioned(&self, key: &str) -> Result<(Bytes, ObjectMeta)> {
        let path = self.key_to_path(key);
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| io_error(key, "open", e))?;
        // Metadata from the open handle matches the bytes read, even if the
        // path is replaced concurrently.
        let metadata = file
            .metadata()
            .await
            .map_err(|e| io_error(key, "stat", e))?;
        if metadata.is_dir() {
            return Err(CertStoreError::not_found(key));
        }
        let mut data = Vec::with_capacity(metadata.len() as usize);
        file.read_to_end(&mut data)
            .await
            .map_err(|e| CertStoreError::storage(format!("Failed to read {}", path.display()), e))?;
        debug!("Get {} bytes from {}", data.len(), key);
        Ok((Bytes::from(data), build_meta(key, &metadata)))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn head(&self, key: &str) -> Result<ObjectMeta> {
        self.stat_path(&self.key_to_path(key), key).await
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key);
        fs::remove_file(&path)
            .await
            .map_err(|e| io_error(key, "delete", e))?;
        debug!("Deleted {}", key);
        Ok(())
    }

    fn list<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<ObjectMeta>> {
        let prefix = prefix.trim_matches('/');
        let start = if prefix.is_empty() {
            self.base_dir.clone()
        } else {
            self.key_to_path(prefix)
        };
        let walk = Walk {
            base: self.base_dir.clone(),
            pending: vec![start],
            current: None,
            done: false,
        };
        stream::unfold(walk, |mut walk| async move {
            let item = walk.next_object().await?;
            Some((item, walk))
        })
        .boxed()
    }

    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> Result<Option<ObjectVersion>> {
        let path = self.key_to_path(key);
        let tmp = self.write_temp(&path, &data).await?;

        // link(2) refuses to overwrite, so only one creator wins and the
        // winner's content is complete the moment the name appears.
        let linked = fs::hard_link(&tmp, &path).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => {
                let meta = self.stat_path(&path, key).await?;
                debug!("put_if_not_exists {} → created", key);
                Ok(Some(meta.version))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("put_if_not_exists {} → already exists", key);
                Ok(None)
            }
            Err(e) => Err(CertStoreError::storage(
                format!("Failed to create {}", path.display()),
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
        let _guard = self.replace_lock.lock().await;
        let path = self.key_to_path(key);
        let current = match self.stat_path(&path, key).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if &current.version != expected {
            debug!("put_if_matches {} → version changed", key);
            return Ok(None);
        }
        let version = self.write_replace(&path, &data).await?;
        debug!("put_if_matches {} → replaced", key);
        Ok(Some(version))
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            atomic_create: true,
            atomic_replace: false,
        }
    }
}

/// Lazy depth-first walk over a directory tree.
struct Walk {
    base: PathBuf,
    pending: Vec<PathBuf>,
    current: Option<fs::ReadDir>,
    done: bool,
}

impl Walk {
    async fn next_object(&mut self) -> Option<Result<ObjectMeta>> {
        loop {
            if self.done {
                return None;
            }
            let Some(entries) = self.current.as_mut() else {
                let dir = self.pending.pop()?;
                match fs::read_dir(&dir).await {
                    Ok(entries) => self.current = Some(entries),
                    Err(e) if is_absent(&e) => {}
                    Err(e) => {
                        return Some(Err(self.fail(format!(
                            "Failed to read directory {}",
                            dir.display()
                        ), e)))
                    }
                }
                continue;
            };

            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.current = None;
                    continue;
                }
                Err(e) => return Some(Err(self.fail("Failed to read directory entry".into(), e))),
            };

            if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Removed between readdir and stat.
                Err(e) if is_absent(&e) => continue,
                Err(e) => {
                    return Some(Err(self.fail(format!("Failed to stat {}", path.display()), e)))
                }
            };
            if metadata.is_dir() {
                self.pending.push(path);
                continue;
            }

            let relative = match path.strip_prefix(&self.base) {
                Ok(relative) => relative,
                Err(e) => {
                    self.done = true;
                    return Some(Err(CertStoreError::Internal {
                        message: format!("Path prefix strip failed: {e}"),
                    }));
                }
            };
            // Normalise to forward slashes for cross-platform key consistency
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            return Some(Ok(build_meta(&key, &metadata)));
        }
    }

    fn fail(&mut self, message: String, e: std::io::Error) -> CertStoreError {
        self.done = true;
        CertStoreError::storage(message, e)
    }
}

/// `ENOTDIR` on Linux and macOS.
const ENOTDIR: i32 = 20;

fn is_absent(e: &std::io::Error) -> bool {
    // A path component that is a file rather than a directory means absent.
    e.kind() == std::io::ErrorKind::NotFound || e.raw_os_error() == Some(ENOTDIR)
}

fn io_error(key: &str, op: &str, e: std::io::Error) -> CertStoreError {
    if is_absent(&e) {
        CertStoreError::not_found(key)
    } else {
        CertStoreError::storage(format!("{op} failed for {key}"), e)
    }
}

fn build_meta(key: &str, metadata: &std::fs::Metadata) -> ObjectMeta {
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let nanos = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    ObjectMeta {
        name: key.to_string(),
        size: metadata.len(),
        last_modified: DateTime::<Utc>::from(modified),
        version: ObjectVersion {
            e_tag: Some(format!("{:x}-{:x}", nanos, metadata.len())),
            version: None,
        },
    }
}
