//! certbucket core types, traits, configuration, and errors.
//!
//! This crate provides the foundational building blocks for storing TLS
//! certificate material in a remote object store: validated logical keys,
//! the [`ObjectBackend`] trait, the key-to-object [`Namespace`] mapper,
//! storage configuration, per-operation [`Context`], and the unified error
//! type.

pub mod config;
pub mod context;
pub mod error;
pub mod namespace;
pub mod storage;
pub mod types;

pub use config::{BucketLocation, LockConfig, StorageConfig};
pub use context::Context;
pub use error::{CertStoreError, ErrorKind};
pub use namespace::Namespace;
pub use storage::{BackendCapabilities, ObjectBackend};
pub use types::*;

/// Convenience Result type using [`CertStoreError`].
pub type Result<T> = std::result::Result<T, CertStoreError>;
