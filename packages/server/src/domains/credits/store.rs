//! Credit persistence.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use super::error::CreditError;
use super::models::{ChargeRef, CreditAccount, CreditReason, CreditTransaction};
use crate::common::OwnerId;

/// Storage seam for balances and the ledger.
///
/// Implementations must apply every balance change and its ledger entry
/// atomically, and must never let a balance go below zero.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Current balance; owners without an account have zero.
    async fn balance(&self, owner: OwnerId) -> Result<i64, CreditError>;

    async fn account(&self, owner: OwnerId) -> Result<Option<CreditAccount>, CreditError>;

    /// Increase the balance, opening the account on first use.
    async fn credit(
        &self,
        owner: OwnerId,
        amount: i64,
        reason: CreditReason,
    ) -> Result<CreditAccount, CreditError>;

    /// Decrease the balance if it covers `amount`.
    async fn debit(
        &self,
        owner: OwnerId,
        amount: i64,
        reason: CreditReason,
        charge: Option<ChargeRef>,
    ) -> Result<CreditAccount, CreditError>;

    /// Most recent ledger entries first.
    async fn transactions(
        &self,
        owner: OwnerId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CreditError>;
}

// ============================================================================
// Postgres
// ============================================================================

pub struct PostgresCreditStore {
    pool: PgPool,
}

impl PostgresCreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Debit inside a caller-owned transaction.
///
/// The conditional UPDATE is the commit-time guard: if the balance no longer
/// covers `amount` no row matches and nothing changes. Callers roll back on
/// any error.
pub async fn debit_in_tx(
    conn: &mut PgConnection,
    owner: OwnerId,
    amount: i64,
    reason: CreditReason,
    charge: Option<ChargeRef>,
) -> Result<CreditAccount, CreditError> {
    let updated = sqlx::query_as::<_, CreditAccount>(
        r#"
        UPDATE credit_accounts
        SET balance = balance - $2,
            updated_at = NOW()
        WHERE owner_id = $1 AND balance >= $2
        RETURNING *
        "#,
    )
    .bind(owner)
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;

    let account = match updated {
        Some(account) => account,
        None => {
            let balance: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE owner_id = $1")
                    .bind(owner)
                    .fetch_optional(&mut *conn)
                    .await?;
            return Err(match balance {
                None => CreditError::AccountNotFound(owner),
                Some(balance) => CreditError::ConcurrencyViolation {
                    balance,
                    required: amount,
                },
            });
        }
    };

    let entry = CreditTransaction::new(owner, -amount, reason, account.balance, charge);
    insert_transaction(conn, &entry).await.map_err(|e| match (e, charge) {
        (sqlx::Error::Database(db), Some(charge)) if db.is_unique_violation() => {
            CreditError::AlreadyCharged {
                job_id: charge.job_id,
                attempt: charge.attempt,
            }
        }
        (e, _) => CreditError::Database(e),
    })?;

    debug!(owner_id = %owner, amount, balance = account.balance, "Debited credit");
    Ok(account)
}

async fn insert_transaction(
    conn: &mut PgConnection,
    entry: &CreditTransaction,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO credit_transactions
            (id, owner_id, job_id, attempt, amount, reason, balance_after, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.owner_id)
    .bind(entry.job_id)
    .bind(entry.attempt)
    .bind(entry.amount)
    .bind(entry.reason)
    .bind(entry.balance_after)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl CreditStore for PostgresCreditStore {
    async fn balance(&self, owner: OwnerId) -> Result<i64, CreditError> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE owner_id = $1")
                .bind(owner)
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn account(&self, owner: OwnerId) -> Result<Option<CreditAccount>, CreditError> {
        sqlx::query_as::<_, CreditAccount>("SELECT * FROM credit_accounts WHERE owner_id = $1")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn credit(
        &self,
        owner: OwnerId,
        amount: i64,
        reason: CreditReason,
    ) -> Result<CreditAccount, CreditError> {
        let mut tx = self.pool.begin().await?;

        let account = sqlx::query_as::<_, CreditAccount>(
            r#"
            INSERT INTO credit_accounts (owner_id, balance)
            VALUES ($1, $2)
            ON CONFLICT (owner_id) DO UPDATE
            SET balance = credit_accounts.balance + EXCLUDED.balance,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(owner)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        let entry = CreditTransaction::new(owner, amount, reason, account.balance, None);
        insert_transaction(&mut *tx, &entry).await?;

        tx.commit().await?;
        Ok(account)
    }

    async fn debit(
        &self,
        owner: OwnerId,
        amount: i64,
        reason: CreditReason,
        charge: Option<ChargeRef>,
    ) -> Result<CreditAccount, CreditError> {
        let mut tx = self.pool.begin().await?;
        let account = debit_in_tx(&mut *tx, owner, amount, reason, charge).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn transactions(
        &self,
        owner: OwnerId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CreditError> {
        sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT * FROM credit_transactions
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }
}
