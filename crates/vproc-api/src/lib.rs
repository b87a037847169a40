//! HTTP API for submitting transcoding jobs and following their progress.
//!
//! The API is thin: submission goes through [`JobProducer`], reads come
//! straight from the metadata store, and progress is relayed from the
//! progress bus as Server-Sent Events.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod producer;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use producer::{JobProducer, SubmitJob};
pub use routes::create_router;
pub use state::AppState;
