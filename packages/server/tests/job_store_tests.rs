//! Job store tests against Postgres: compare-and-set transitions and the
//! charge bundled with completion.

mod common;

use crate::common::*;
use futures::future::join_all;
use serde_json::json;
use server_core::domains::credits::{CreditError, CreditStore, GENERATION_COST};
use server_core::domains::generation::models::Completion;
use server_core::domains::generation::{
    JobFilter, JobKind, JobStatus, JobStore, ResultRetention, StoreError,
};
use std::time::Duration;
use test_context::test_context;

const LEASE: Duration = Duration::from_secs(60);

fn completion(job: &server_core::domains::generation::GenerationJob) -> Completion {
    Completion {
        job_id: job.id,
        owner_id: job.owner_id,
        attempt: job.attempt,
        payload: json!({ "segments": ["campers"] }),
        degraded: false,
        charge: GENERATION_COST,
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_begin_processing_admits_exactly_one(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let owner = funded_owner(&ctx.ledger(), 1).await;
    let job = waiting_job(jobs.as_ref(), owner).await;

    let attempts = join_all(
        (0..8).map(|_| jobs.begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)),
    )
    .await;

    let winners = attempts.iter().filter(|r| r.is_ok()).count();
    let conflicts = attempts
        .iter()
        .filter(|r| matches!(r, Err(StoreError::AlreadyProcessing(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);

    let current = jobs.get(job.id).await.unwrap();
    assert_eq!(current.status, JobStatus::Processing);
    assert_eq!(current.attempt, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn completion_debits_in_the_same_transaction(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let credits = ctx.credits();
    let owner = funded_owner(&ctx.ledger(), 3).await;
    let job = waiting_job(jobs.as_ref(), owner).await;
    let processing = jobs
        .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();

    let done = jobs.complete(completion(&processing)).await.unwrap();

    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.result_payload, Some(json!({ "segments": ["campers"] })));
    assert!(done.completed_at.is_some());
    assert_eq!(credits.balance(owner).await.unwrap(), 2);

    let history = credits.transactions(owner, 10).await.unwrap();
    assert_eq!(history[0].amount, -1);
    assert_eq!(history[0].job_id, Some(job.id));
    assert_eq!(history[0].attempt, Some(1));
    assert_eq!(history[0].balance_after, 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn replayed_completion_is_rejected_and_charged_once(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let credits = ctx.credits();
    let owner = funded_owner(&ctx.ledger(), 5).await;
    let job = waiting_job(jobs.as_ref(), owner).await;
    let processing = jobs
        .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();

    jobs.complete(completion(&processing)).await.unwrap();
    let replay = jobs.complete(completion(&processing)).await;

    assert!(matches!(
        replay,
        Err(StoreError::StaleTransition { attempt: 1, .. })
    ));
    assert_eq!(credits.balance(owner).await.unwrap(), 4);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn refused_charge_rolls_back_the_done_write(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let ledger = ctx.ledger();
    let credits = ctx.credits();
    let owner = funded_owner(&ledger, 1).await;
    let job = waiting_job(jobs.as_ref(), owner).await;
    let processing = jobs
        .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();

    // Balance spent elsewhere while the job was processing
    ledger.debit(owner, 1, None).await.unwrap();

    let err = jobs.complete(completion(&processing)).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Credit(CreditError::ConcurrencyViolation { balance: 0, required: 1 })
    ));

    let current = jobs.get(job.id).await.unwrap();
    assert_eq!(current.status, JobStatus::Processing);
    assert!(current.result_payload.is_none());
    assert_eq!(credits.balance(owner).await.unwrap(), 0);
    let charges = credits.transactions(owner, 10).await.unwrap();
    assert!(charges.iter().all(|t| t.job_id.is_none()));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failure_leaves_balance_untouched(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let credits = ctx.credits();
    let owner = funded_owner(&ctx.ledger(), 2).await;
    let job = waiting_job(jobs.as_ref(), owner).await;
    let processing = jobs
        .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();

    let failed = jobs
        .fail(job.id, processing.attempt, "generation backend unavailable: timeout")
        .await
        .unwrap();

    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("generation backend unavailable: timeout")
    );
    assert_eq!(credits.balance(owner).await.unwrap(), 2);

    // A stale attempt cannot overwrite the recorded failure
    assert!(matches!(
        jobs.fail(job.id, processing.attempt, "late").await,
        Err(StoreError::StaleTransition { .. })
    ));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn restart_keeps_or_clears_previous_result(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let owner = funded_owner(&ctx.ledger(), 3).await;
    let job = waiting_job(jobs.as_ref(), owner).await;

    let first = jobs
        .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();
    jobs.complete(completion(&first)).await.unwrap();

    let kept = jobs
        .begin_processing(job.id, ResultRetention::KeepUntilReplaced, LEASE)
        .await
        .unwrap();
    assert_eq!(kept.attempt, 2);
    assert_eq!(kept.result_payload, Some(json!({ "segments": ["campers"] })));
    assert!(kept.completed_at.is_none());
    jobs.complete(completion(&kept)).await.unwrap();

    let cleared = jobs
        .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();
    assert_eq!(cleared.attempt, 3);
    assert!(cleared.result_payload.is_none());
    assert!(!cleared.degraded);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn expired_lease_is_reclaimed_and_the_old_attempt_goes_stale(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let credits = ctx.credits();
    let owner = funded_owner(&ctx.ledger(), 2).await;
    let job = waiting_job(jobs.as_ref(), owner).await;
    let abandoned = jobs
        .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();
    assert!(abandoned.lease_expires_at.unwrap() > abandoned.started_at.unwrap());

    assert!(matches!(
        jobs.begin_processing(job.id, ResultRetention::ClearAtStart, LEASE).await,
        Err(StoreError::AlreadyProcessing(_))
    ));

    sqlx::query("UPDATE generation_jobs SET lease_expires_at = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(job.id)
        .execute(&ctx.db_pool)
        .await
        .unwrap();

    let reclaimed = jobs
        .begin_processing(job.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();
    assert_eq!(reclaimed.attempt, abandoned.attempt + 1);

    assert!(matches!(
        jobs.complete(completion(&abandoned)).await,
        Err(StoreError::StaleTransition { .. })
    ));
    assert_eq!(credits.balance(owner).await.unwrap(), 2);

    let done = jobs.complete(completion(&reclaimed)).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert!(done.lease_expires_at.is_none());
    assert_eq!(credits.balance(owner).await.unwrap(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn missing_job_is_not_found(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let id = server_core::common::JobId::new();

    assert!(matches!(jobs.get(id).await, Err(StoreError::NotFound(got)) if got == id));
    assert!(matches!(
        jobs.begin_processing(id, ResultRetention::ClearAtStart, LEASE).await,
        Err(StoreError::NotFound(_))
    ));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn list_is_scoped_filtered_and_newest_first(ctx: &TestHarness) {
    let jobs = ctx.jobs();
    let ledger = ctx.ledger();
    let owner = funded_owner(&ledger, 1).await;
    let other = funded_owner(&ledger, 1).await;

    let first = waiting_job(jobs.as_ref(), owner).await;
    let second = waiting_job(jobs.as_ref(), owner).await;
    waiting_job(jobs.as_ref(), other).await;
    jobs.begin_processing(second.id, ResultRetention::ClearAtStart, LEASE)
        .await
        .unwrap();

    let all = jobs.list(owner, &JobFilter::default()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);

    let waiting = jobs
        .list(owner, &JobFilter::builder().status(JobStatus::Waiting).build())
        .await
        .unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].id, first.id);

    let none = jobs
        .list(owner, &JobFilter::builder().kind(JobKind::VirtualTryOn).build())
        .await
        .unwrap();
    assert!(none.is_empty());

    let paged = jobs
        .list(owner, &JobFilter::builder().limit(1).offset(1).build())
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].id, first.id);
}
