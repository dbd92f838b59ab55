//! certbucket runtime: distributed lease locks and the storage facade.
//!
//! [`CertStorage`] is the entry point. It is provisioned from a
//! [`StorageConfig`](certbucket_core::StorageConfig), talks to the object
//! store through an [`ObjectBackend`](certbucket_core::ObjectBackend), and
//! coordinates fleet-wide critical sections through the [`LockManager`].

pub mod cert_storage;
pub mod lock;

pub use cert_storage::CertStorage;
pub use lock::{LockHandle, LockManager, LockRecord, LockState};
