//! Structured job logging.

use tracing::{error, info, warn, Span};

use vproc_models::JobId;

/// Logs job lifecycle events with the job id and queue entry attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    entry_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, entry_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            entry_id: entry_id.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            entry_id = %self.entry_id,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            entry_id = %self.entry_id,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            entry_id = %self.entry_id,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            entry_id = %self.entry_id,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            entry_id = %self.entry_id,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Span to instrument the job's future with.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, entry_id = %self.entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let logger = JobLogger::new(&JobId::from("v1"), "17-0");
        assert_eq!(logger.job_id(), "v1");
        assert_eq!(logger.entry_id(), "17-0");
    }
}
