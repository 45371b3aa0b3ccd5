//! In-process store for tests and single-process development runs.
//!
//! Jobs, balances and the ledger share one mutex, which gives the same
//! atomicity the Postgres stores get from transactions: a Done write and its
//! debit are applied together or not at all.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::common::{JobId, OwnerId};
use crate::domains::credits::{
    ChargeRef, CreditAccount, CreditError, CreditReason, CreditStore, CreditTransaction,
};
use crate::domains::generation::models::{
    Completion, GenerationJob, JobFilter, JobStatus, NewJob, ResultRetention,
};
use crate::domains::generation::{JobStore, StoreError};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, GenerationJob>,
    accounts: HashMap<OwnerId, CreditAccount>,
    ledger: Vec<CreditTransaction>,
}

impl State {
    fn debit(
        &mut self,
        owner: OwnerId,
        amount: i64,
        reason: CreditReason,
        charge: Option<ChargeRef>,
    ) -> Result<CreditAccount, CreditError> {
        if let Some(charge) = charge {
            if self.ledger.iter().any(|t| t.charge_ref() == Some(charge)) {
                return Err(CreditError::AlreadyCharged {
                    job_id: charge.job_id,
                    attempt: charge.attempt,
                });
            }
        }

        let account = self
            .accounts
            .get_mut(&owner)
            .ok_or(CreditError::AccountNotFound(owner))?;
        if !account.covers(amount) {
            return Err(CreditError::ConcurrencyViolation {
                balance: account.balance,
                required: amount,
            });
        }
        account.balance -= amount;
        account.updated_at = Utc::now();
        let account = account.clone();

        self.ledger.push(CreditTransaction::new(
            owner,
            -amount,
            reason,
            account.balance,
            charge,
        ));
        Ok(account)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite a stored job's status, bypassing the state machine. Test setup only.
    pub fn force_status(&self, id: JobId, status: JobStatus) {
        if let Some(job) = self.lock().jobs.get_mut(&id) {
            job.status = status;
        }
    }

    /// Move a job's lease into the past, as if its runner had vanished. Test setup only.
    pub fn force_lease_expiry(&self, id: JobId) {
        if let Some(job) = self.lock().jobs.get_mut(&id) {
            job.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: NewJob) -> Result<GenerationJob, StoreError> {
        let job = job.into_job(Utc::now());
        self.lock().jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<GenerationJob, StoreError> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, owner: OwnerId, filter: &JobFilter) -> Result<Vec<GenerationJob>, StoreError> {
        let state = self.lock();
        let mut jobs: Vec<GenerationJob> = state
            .jobs
            .values()
            .filter(|job| job.owner_id == owner && filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(jobs
            .into_iter()
            .skip(filter.clamped_offset() as usize)
            .take(filter.clamped_limit() as usize)
            .collect())
    }

    async fn begin_processing(
        &self,
        id: JobId,
        retention: ResultRetention,
        lease: Duration,
    ) -> Result<GenerationJob, StoreError> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let now = Utc::now();
        if !job.is_claimable(now) {
            return Err(StoreError::AlreadyProcessing(id));
        }

        job.status = JobStatus::Processing;
        job.attempt += 1;
        job.lease_expires_at = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease));
        job.started_at = Some(now);
        job.completed_at = None;
        job.error_message = None;
        if retention == ResultRetention::ClearAtStart {
            job.result_payload = None;
            job.degraded = false;
        }
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn complete(&self, completion: Completion) -> Result<GenerationJob, StoreError> {
        let mut state = self.lock();

        let current = state
            .jobs
            .get(&completion.job_id)
            .ok_or(StoreError::NotFound(completion.job_id))?;
        if current.status != JobStatus::Processing || current.attempt != completion.attempt {
            return Err(StoreError::StaleTransition {
                job_id: completion.job_id,
                attempt: completion.attempt,
            });
        }

        if completion.charge > 0 {
            state.debit(
                completion.owner_id,
                completion.charge,
                CreditReason::Generation,
                Some(ChargeRef {
                    job_id: completion.job_id,
                    attempt: completion.attempt,
                }),
            )?;
        }

        let now = Utc::now();
        let job = state
            .jobs
            .get_mut(&completion.job_id)
            .ok_or(StoreError::NotFound(completion.job_id))?;
        job.status = JobStatus::Done;
        job.result_payload = Some(completion.payload);
        job.degraded = completion.degraded;
        job.error_message = None;
        job.lease_expires_at = None;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn fail(&self, id: JobId, attempt: i32, message: &str) -> Result<GenerationJob, StoreError> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if job.status != JobStatus::Processing || job.attempt != attempt {
            return Err(StoreError::StaleTransition { job_id: id, attempt });
        }

        let now = Utc::now();
        job.status = JobStatus::Error;
        job.error_message = Some(message.to_string());
        job.lease_expires_at = None;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }
}

#[async_trait]
impl CreditStore for MemoryStore {
    async fn balance(&self, owner: OwnerId) -> Result<i64, CreditError> {
        Ok(self.lock().accounts.get(&owner).map_or(0, |a| a.balance))
    }

    async fn account(&self, owner: OwnerId) -> Result<Option<CreditAccount>, CreditError> {
        Ok(self.lock().accounts.get(&owner).cloned())
    }

    async fn credit(
        &self,
        owner: OwnerId,
        amount: i64,
        reason: CreditReason,
    ) -> Result<CreditAccount, CreditError> {
        let mut state = self.lock();
        let account = state
            .accounts
            .entry(owner)
            .or_insert_with(|| CreditAccount::empty(owner));
        account.balance += amount;
        account.updated_at = Utc::now();
        let account = account.clone();

        state
            .ledger
            .push(CreditTransaction::new(owner, amount, reason, account.balance, None));
        Ok(account)
    }

    async fn debit(
        &self,
        owner: OwnerId,
        amount: i64,
        reason: CreditReason,
        charge: Option<ChargeRef>,
    ) -> Result<CreditAccount, CreditError> {
        self.lock().debit(owner, amount, reason, charge)
    }

    async fn transactions(
        &self,
        owner: OwnerId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CreditError> {
        Ok(self
            .lock()
            .ledger
            .iter()
            .rev()
            .filter(|t| t.owner_id == owner)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::generation::models::{JobInputs, JobKind};
    use serde_json::json;

    const LEASE: Duration = Duration::from_secs(60);

    async fn processing_job(store: &MemoryStore, owner: OwnerId) -> GenerationJob {
        let job = store
            .create(NewJob::new(owner, JobKind::PainpointExtraction, JobInputs::new()))
            .await
            .unwrap();
        store
            .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
            .await
            .unwrap()
    }

    fn completion(job: &GenerationJob, payload: Value) -> Completion {
        Completion {
            job_id: job.id,
            owner_id: job.owner_id,
            attempt: job.attempt,
            payload,
            degraded: false,
            charge: 1,
        }
    }

    #[tokio::test]
    async fn failed_debit_leaves_job_processing() {
        let store = MemoryStore::new();
        let owner = OwnerId::new();
        let job = processing_job(&store, owner).await;

        let err = store.complete(completion(&job, json!({}))).await.unwrap_err();
        assert!(matches!(err, StoreError::Credit(CreditError::AccountNotFound(_))));

        let job = store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.result_payload.is_none());
    }

    #[tokio::test]
    async fn completion_replay_is_stale() {
        let store = MemoryStore::new();
        let owner = OwnerId::new();
        store.credit(owner, 5, CreditReason::Grant).await.unwrap();
        let job = processing_job(&store, owner).await;

        store.complete(completion(&job, json!({"a": 1}))).await.unwrap();
        let replay = store.complete(completion(&job, json!({"a": 2}))).await;

        assert!(matches!(replay, Err(StoreError::StaleTransition { .. })));
        assert_eq!(store.balance(owner).await.unwrap(), 4);
        assert_eq!(store.get(job.id).await.unwrap().result_payload, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn abandoned_claim_is_reclaimed_after_its_lease() {
        let store = MemoryStore::new();
        let owner = OwnerId::new();
        store.credit(owner, 5, CreditReason::Grant).await.unwrap();
        let abandoned = processing_job(&store, owner).await;
        assert!(abandoned.lease_expires_at.is_some());

        let live = store
            .begin_processing(abandoned.id, ResultRetention::ClearAtStart, LEASE)
            .await;
        assert!(matches!(live, Err(StoreError::AlreadyProcessing(_))));

        store.force_lease_expiry(abandoned.id);
        let reclaimed = store
            .begin_processing(abandoned.id, ResultRetention::ClearAtStart, LEASE)
            .await
            .unwrap();
        assert_eq!(reclaimed.attempt, abandoned.attempt + 1);

        // The vanished runner's late writes no longer land.
        let late = store.complete(completion(&abandoned, json!({"late": true}))).await;
        assert!(matches!(late, Err(StoreError::StaleTransition { .. })));
        let late = store.fail(abandoned.id, abandoned.attempt, "late").await;
        assert!(matches!(late, Err(StoreError::StaleTransition { .. })));
        assert_eq!(store.balance(owner).await.unwrap(), 5);

        let done = store.complete(completion(&reclaimed, json!({"v": 1}))).await.unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(done.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn keep_until_replaced_preserves_previous_result() {
        let store = MemoryStore::new();
        let owner = OwnerId::new();
        store.credit(owner, 5, CreditReason::Grant).await.unwrap();
        let job = processing_job(&store, owner).await;
        store.complete(completion(&job, json!({"v": 1}))).await.unwrap();

        let restarted = store
            .begin_processing(job.id, ResultRetention::KeepUntilReplaced, LEASE)
            .await
            .unwrap();
        assert_eq!(restarted.attempt, 2);
        assert_eq!(restarted.result_payload, Some(json!({"v": 1})));

        store.fail(job.id, 2, "upstream down").await.unwrap();
        let cleared = store
            .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
            .await
            .unwrap();
        assert!(cleared.result_payload.is_none());
        assert!(cleared.error_message.is_none());
    }

    #[tokio::test]
    async fn list_is_owner_scoped_and_newest_first() {
        let store = MemoryStore::new();
        let owner = OwnerId::new();
        let first = store
            .create(NewJob::new(owner, JobKind::MarketAnalysis, JobInputs::new()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store
            .create(NewJob::new(owner, JobKind::VirtualTryOn, JobInputs::new()))
            .await
            .unwrap();
        store
            .create(NewJob::new(OwnerId::new(), JobKind::MarketAnalysis, JobInputs::new()))
            .await
            .unwrap();

        let all = store.list(owner, &JobFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let filter = JobFilter::builder().kind(JobKind::MarketAnalysis).build();
        let only_market = store.list(owner, &filter).await.unwrap();
        assert_eq!(only_market.len(), 1);
        assert_eq!(only_market[0].id, first.id);
    }
}
