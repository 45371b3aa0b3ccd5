use std::sync::Arc;

use tracing::info;

use super::error::CreditError;
use super::models::{ChargeRef, CreditAccount, CreditReason, CreditTransaction};
use super::store::CreditStore;
use crate::common::OwnerId;

/// Credits charged for one job reaching Done.
pub const GENERATION_COST: i64 = 1;

/// Owner-facing credit operations.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn CreditStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    /// Pre-flight read: ok when the balance covers one generation.
    ///
    /// Nothing is held; the real guard is the debit at completion.
    pub async fn check_available(&self, owner: OwnerId) -> Result<i64, CreditError> {
        let balance = self.store.balance(owner).await?;
        if balance < GENERATION_COST {
            return Err(CreditError::InsufficientCredit {
                balance,
                required: GENERATION_COST,
            });
        }
        Ok(balance)
    }

    pub async fn balance(&self, owner: OwnerId) -> Result<i64, CreditError> {
        self.store.balance(owner).await
    }

    /// Standalone debit. Job charges go through the job store's completion
    /// transaction instead.
    pub async fn debit(
        &self,
        owner: OwnerId,
        amount: i64,
        charge: Option<ChargeRef>,
    ) -> Result<CreditAccount, CreditError> {
        if amount <= 0 {
            return Err(CreditError::InvalidAmount(amount));
        }
        let reason = if charge.is_some() {
            CreditReason::Generation
        } else {
            CreditReason::Adjustment
        };
        self.store.debit(owner, amount, reason, charge).await
    }

    /// Administrative top-up. No upper bound.
    pub async fn credit(&self, owner: OwnerId, amount: i64) -> Result<CreditAccount, CreditError> {
        if amount <= 0 {
            return Err(CreditError::InvalidAmount(amount));
        }
        let account = self.store.credit(owner, amount, CreditReason::Grant).await?;
        info!(owner_id = %owner, amount, balance = account.balance, "Granted credit");
        Ok(account)
    }

    pub async fn transactions(
        &self,
        owner: OwnerId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CreditError> {
        self.store.transactions(owner, limit.clamp(1, 500)).await
    }
}
