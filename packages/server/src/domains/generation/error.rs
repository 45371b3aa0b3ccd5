use generation_client::GenerationError;
use thiserror::Error;

use crate::common::JobId;
use crate::domains::credits::CreditError;
use crate::kernel::file_store::FileStoreError;

/// Job persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    /// The compare-and-set into Processing lost: the job is already there.
    #[error("job {0} is already processing")]
    AlreadyProcessing(JobId),

    /// The job left the attempt this write was meant for.
    #[error("job {job_id} is no longer processing attempt {attempt}")]
    StaleTransition { job_id: JobId, attempt: i32 },

    /// The charge bundled with a Done write failed; nothing was written.
    #[error(transparent)]
    Credit(#[from] CreditError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the job orchestrator.
///
/// Precondition failures (everything except `UpstreamUnavailable` and
/// acquisition-time `InvalidInput`) are returned before the job changes state.
#[derive(Debug, Error)]
pub enum JobError {
    /// Backend credential or settings missing. Never retried.
    #[error("generation backend is not configured: {0}")]
    Configuration(String),

    #[error("generation backend unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("insufficient credit: balance {balance}")]
    InsufficientCredit { balance: i64 },

    #[error("job {0} is already processing")]
    AlreadyProcessing(JobId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    /// Background pool queue is full; nothing was started.
    #[error("too many jobs in flight, try again shortly")]
    Busy,

    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Safe to call Start again without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::UpstreamUnavailable(_) | JobError::AlreadyProcessing(_) | JobError::Busy
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, JobError::AlreadyProcessing(_))
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => JobError::NotFound(id),
            StoreError::AlreadyProcessing(id) => JobError::AlreadyProcessing(id),
            StoreError::Credit(err) => err.into(),
            other => JobError::Internal(other.to_string()),
        }
    }
}

impl From<CreditError> for JobError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::InsufficientCredit { balance, .. } => JobError::InsufficientCredit { balance },
            other => JobError::Internal(other.to_string()),
        }
    }
}

impl From<GenerationError> for JobError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Configuration(msg) => JobError::Configuration(msg),
            GenerationError::UpstreamUnavailable(msg) => JobError::UpstreamUnavailable(msg),
            GenerationError::InvalidImage(msg) => JobError::InvalidInput(msg),
        }
    }
}

impl From<FileStoreError> for JobError {
    fn from(err: FileStoreError) -> Self {
        JobError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_retryable() {
        let err = JobError::AlreadyProcessing(JobId::new());
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert!(!JobError::Configuration("missing key".into()).is_retryable());
        assert!(!JobError::InsufficientCredit { balance: 0 }.is_retryable());
    }

    #[test]
    fn store_conflicts_map_to_job_conflicts() {
        let id = JobId::new();
        assert!(matches!(
            JobError::from(StoreError::AlreadyProcessing(id)),
            JobError::AlreadyProcessing(got) if got == id
        ));
        assert!(matches!(
            JobError::from(StoreError::Credit(CreditError::InsufficientCredit { balance: 0, required: 1 })),
            JobError::InsufficientCredit { balance: 0 }
        ));
    }

    #[test]
    fn generation_errors_keep_their_category() {
        assert!(matches!(
            JobError::from(GenerationError::Configuration("no key".into())),
            JobError::Configuration(_)
        ));
        assert!(matches!(
            JobError::from(GenerationError::InvalidImage("garment: not an image".into())),
            JobError::InvalidInput(_)
        ));
    }
}
