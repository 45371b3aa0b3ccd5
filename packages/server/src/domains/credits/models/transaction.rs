use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{CreditTransactionId, JobId, OwnerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    /// Charge for a job reaching Done
    Generation,
    /// Administrative top-up
    Grant,
    /// Administrative removal
    Adjustment,
}

/// Identifies the job attempt a debit pays for. One entry per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeRef {
    pub job_id: JobId,
    pub attempt: i32,
}

/// Ledger row. Debits carry a negative `amount`.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize)]
pub struct CreditTransaction {
    pub id: CreditTransactionId,
    pub owner_id: OwnerId,
    pub job_id: Option<JobId>,
    pub attempt: Option<i32>,
    pub amount: i64,
    pub reason: CreditReason,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        owner_id: OwnerId,
        amount: i64,
        reason: CreditReason,
        balance_after: i64,
        charge: Option<ChargeRef>,
    ) -> Self {
        Self {
            id: CreditTransactionId::new(),
            owner_id,
            job_id: charge.map(|c| c.job_id),
            attempt: charge.map(|c| c.attempt),
            amount,
            reason,
            balance_after,
            created_at: Utc::now(),
        }
    }

    pub fn charge_ref(&self) -> Option<ChargeRef> {
        match (self.job_id, self.attempt) {
            (Some(job_id), Some(attempt)) => Some(ChargeRef { job_id, attempt }),
            _ => None,
        }
    }
}
