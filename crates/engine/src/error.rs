//! Pipeline error taxonomy

use persistence::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// One coin could not be fetched; the run continues
    #[error("fetch failed for {coin_id}: {reason}")]
    FetchFailed { coin_id: String, reason: String },

    /// The run cannot continue; it is marked failed
    #[error("orchestration failed: {0}")]
    OrchestrationFailed(String),

    /// A single write was rejected
    #[error("persistence error: {0}")]
    Persistence(#[from] DbError),

    /// Best-effort cleanup failed; never changes a run's status
    #[error("retention failed: {0}")]
    Retention(String),
}

impl PipelineError {
    /// Wrap a datastore error from an orchestration step (loading the
    /// watchlist, reading rules) as a run-level failure.
    pub fn orchestration(context: &str, err: impl std::fmt::Display) -> Self {
        Self::OrchestrationFailed(format!("{context}: {err}"))
    }

    /// Per-item persistence errors are recoverable unless the datastore is gone
    pub fn escalate_if_unavailable(err: DbError, context: &str) -> Self {
        if err.is_unavailable() {
            Self::orchestration(context, err)
        } else {
            Self::Persistence(err)
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OrchestrationFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unreachable_datastore_escalates() {
        let rejected = PipelineError::escalate_if_unavailable(
            DbError::Query("constraint".into()),
            "writing snapshot",
        );
        assert!(!rejected.is_fatal());

        let gone = PipelineError::escalate_if_unavailable(
            DbError::Sqlx(persistence::SqlxError::PoolClosed),
            "writing snapshot",
        );
        assert!(gone.is_fatal());
        assert!(gone.to_string().contains("writing snapshot"));
    }
}
