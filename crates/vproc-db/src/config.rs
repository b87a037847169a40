//! Database configuration.

use std::time::Duration;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite URL, e.g. `sqlite://vproc.db?mode=rwc` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    /// How long to wait on a locked database
    pub busy_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://vproc.db?mode=rwc".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            busy_timeout: defaults.busy_timeout,
        }
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}
