//! Metadata store for video assets and their renditions.
//!
//! The [`MetadataStore`] trait is the seam the worker and API depend on;
//! [`SqlxMetadataStore`] implements it over SQLite. Every write is keyed on
//! the job id so reprocessing overwrites rather than duplicates.

pub mod config;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use config::DbConfig;
pub use error::{DbError, DbResult};
pub use sqlite::SqlxMetadataStore;
pub use store::MetadataStore;
