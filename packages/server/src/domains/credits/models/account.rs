use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::OwnerId;

/// Spendable balance of one owner. `balance >= 0` is enforced by a CHECK
/// constraint and by every debit path.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Serialize)]
pub struct CreditAccount {
    pub owner_id: OwnerId,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    pub fn empty(owner_id: OwnerId) -> Self {
        let now = Utc::now();
        Self {
            owner_id,
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn covers(&self, amount: i64) -> bool {
        self.balance >= amount
    }
}
