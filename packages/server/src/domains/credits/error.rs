use thiserror::Error;

use crate::common::{JobId, OwnerId};

#[derive(Debug, Error)]
pub enum CreditError {
    /// Pre-flight check failed; nothing was reserved or charged.
    #[error("insufficient credit: balance {balance}, required {required}")]
    InsufficientCredit { balance: i64, required: i64 },

    /// The balance no longer covered the debit when it was applied.
    #[error("credit balance changed: balance {balance}, required {required}")]
    ConcurrencyViolation { balance: i64, required: i64 },

    #[error("credit amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("no credit account for owner {0}")]
    AccountNotFound(OwnerId),

    /// A ledger entry for this job attempt already exists.
    #[error("job {job_id} attempt {attempt} has already been charged")]
    AlreadyCharged { job_id: JobId, attempt: i32 },

    #[error("credit store error: {0}")]
    Database(#[from] sqlx::Error),
}
