//! Test fixtures for creating owners and jobs directly through the stores.

use server_core::common::OwnerId;
use server_core::domains::credits::CreditLedger;
use server_core::domains::generation::models::NewJob;
use server_core::domains::generation::{GenerationJob, JobInputs, JobKind, JobStore};

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

/// A new owner holding `credits`.
pub async fn funded_owner(ledger: &CreditLedger, credits: i64) -> OwnerId {
    let owner = OwnerId::new();
    if credits > 0 {
        ledger
            .credit(owner, credits)
            .await
            .expect("Failed to grant credit");
    }
    owner
}

pub fn market_inputs() -> JobInputs {
    JobInputs::new()
        .param("product", "Insulated water bottle")
        .param("market", "Outdoor retail, North America")
}

/// A Waiting market analysis job.
pub async fn waiting_job(jobs: &dyn JobStore, owner: OwnerId) -> GenerationJob {
    jobs.create(NewJob::new(owner, JobKind::MarketAnalysis, market_inputs()))
        .await
        .expect("Failed to create job")
}
