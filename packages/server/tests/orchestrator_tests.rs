//! End-to-end job runs over the Postgres stores with a scripted backend.

mod common;

use crate::common::*;
use generation_client::testing::MockGenerationAdapter;
use serde_json::json;
use server_core::domains::generation::{ImageSource, JobError, JobInputs, JobKind, JobStatus};
use server_core::kernel::MockFileStore;
use std::time::Duration;
use test_context::test_context;

const PERSON_URL: &str = "https://cdn.test/person.png";
const GARMENT_URL: &str = "https://cdn.test/garment.png";

fn try_on_files() -> MockFileStore {
    MockFileStore::new()
        .with_url(PERSON_URL, PNG.to_vec())
        .with_url(GARMENT_URL, PNG.to_vec())
}

fn try_on_inputs() -> JobInputs {
    JobInputs::new()
        .image("person", ImageSource::url(PERSON_URL))
        .image("garment", ImageSource::url(GARMENT_URL))
}

#[test_context(TestHarness)]
#[tokio::test]
async fn background_analysis_runs_to_done(ctx: &TestHarness) {
    let adapter = MockGenerationAdapter::new().with_text(
        "Sure!\n```json\n{\"segments\": [{\"name\": \"Day hikers\", \"size\": \"large\",}]}\n```",
    );
    let (orchestrator, pool) = ctx.orchestrator(adapter.clone(), MockFileStore::new());
    let ledger = ctx.ledger();
    let owner = funded_owner(&ledger, 2).await;

    let job = orchestrator
        .create(owner, JobKind::MarketAnalysis, market_inputs())
        .await
        .unwrap();
    let started = orchestrator.start(owner, job.id).await.unwrap();
    assert_eq!(started.status, JobStatus::Processing);

    pool.shutdown().await;

    let done = orchestrator.get(owner, job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert!(!done.degraded);
    assert_eq!(
        done.result_payload,
        Some(json!({ "segments": [{ "name": "Day hikers", "size": "large" }] }))
    );
    assert_eq!(ledger.balance(owner).await.unwrap(), 1);
    assert_eq!(adapter.call_count(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_interactive_starts_call_the_backend_once(ctx: &TestHarness) {
    let adapter = MockGenerationAdapter::new()
        .with_text("![result](https://images.test/try-on/1.jpg)")
        .with_delay(Duration::from_millis(100));
    let files = try_on_files();
    let (orchestrator, pool) = ctx.orchestrator(adapter.clone(), files.clone());
    let ledger = ctx.ledger();
    let owner = funded_owner(&ledger, 3).await;
    let job = orchestrator
        .create(owner, JobKind::VirtualTryOn, try_on_inputs())
        .await
        .unwrap();

    let (a, b) = tokio::join!(orchestrator.start(owner, job.id), orchestrator.start(owner, job.id));

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(JobError::AlreadyProcessing(_)))));
    assert_eq!(adapter.call_count(), 1);
    assert_eq!(ledger.balance(owner).await.unwrap(), 2);
    assert_eq!(files.live_temporary_files(), 0);

    let done = orchestrator.get(owner, job.id).await.unwrap();
    assert_eq!(
        done.result_payload,
        Some(json!({ "image": "https://images.test/try-on/1.jpg" }))
    );
    pool.shutdown().await;
}

#[test_context(TestHarness)]
#[tokio::test]
async fn zero_balance_rejects_start_without_state_change(ctx: &TestHarness) {
    let adapter = MockGenerationAdapter::new().with_text("unused");
    let (orchestrator, pool) = ctx.orchestrator(adapter.clone(), try_on_files());
    let owner = funded_owner(&ctx.ledger(), 0).await;
    let job = orchestrator
        .create(owner, JobKind::VirtualTryOn, try_on_inputs())
        .await
        .unwrap();

    let err = orchestrator.start(owner, job.id).await.unwrap_err();

    assert!(matches!(err, JobError::InsufficientCredit { balance: 0 }));
    assert_eq!(adapter.call_count(), 0);
    let unchanged = orchestrator.get(owner, job.id).await.unwrap();
    assert_eq!(unchanged.status, JobStatus::Waiting);
    assert_eq!(unchanged.attempt, 0);
    pool.shutdown().await;
}

#[test_context(TestHarness)]
#[tokio::test]
async fn backend_outage_is_recorded_without_charge(ctx: &TestHarness) {
    let adapter = MockGenerationAdapter::new().with_unavailable("request timed out");
    let (orchestrator, pool) = ctx.orchestrator(adapter, try_on_files());
    let ledger = ctx.ledger();
    let owner = funded_owner(&ledger, 1).await;
    let job = orchestrator
        .create(owner, JobKind::VirtualTryOn, try_on_inputs())
        .await
        .unwrap();

    let failed = orchestrator.start(owner, job.id).await.unwrap();

    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("generation backend unavailable: request timed out")
    );
    assert_eq!(ledger.balance(owner).await.unwrap(), 1);
    pool.shutdown().await;
}
