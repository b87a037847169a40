//! Object storage for rendition artifacts and manifests.
//!
//! [`S3ObjectStore`] talks to any S3-compatible endpoint (MinIO, R2, GCS
//! interop). [`LocalObjectStore`] writes to a directory for development.

pub mod error;
pub mod local;
pub mod s3;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use local::LocalObjectStore;
pub use s3::{S3Config, S3ObjectStore};
pub use store::{keys, ObjectStore, PutBody, StoredObject};
