//! Object backend implementations for certbucket.
//!
//! This crate provides concrete implementations of the
//! [`ObjectBackend`](certbucket_core::ObjectBackend) trait:
//!
//! - [`CloudBackend`]: Google Cloud Storage, S3-compatible stores and an
//!   in-memory store, via the `object_store` crate
//! - [`LocalBackend`]: filesystem-backed storage for single-host setups and tests

pub mod cloud;
pub mod local;

pub use cloud::CloudBackend;
pub use local::LocalBackend;
