//! HTTP handlers.

pub mod health;
pub mod jobs;
pub mod progress;
pub mod videos;

pub use health::{health, ready};
