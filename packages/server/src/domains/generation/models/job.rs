use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use typed_builder::TypedBuilder;

use super::inputs::JobInputs;
use super::profile::JobKind;
use crate::common::{JobId, OwnerId};

/// Job lifecycle: `Waiting -> Processing -> {Done, Error}`, and back to
/// Processing from either terminal state on an explicit restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "generation_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// States a Start may leave from.
    pub fn can_start(self) -> bool {
        self != JobStatus::Processing
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation job - SQL persistence layer
#[derive(sqlx::FromRow, Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub kind: JobKind,
    pub inputs: Json<JobInputs>,
    pub status: JobStatus,

    // Result of the latest Done transition; shape depends on kind
    pub result_payload: Option<Value>,
    /// The payload is a fallback, not something the backend produced
    pub degraded: bool,
    pub error_message: Option<String>,

    /// Bumped on every transition into Processing
    pub attempt: i32,
    /// While Processing, the claim is only honored until this instant
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn inputs(&self) -> &JobInputs {
        &self.inputs.0
    }

    /// Whether a Start may claim the job at `now`.
    ///
    /// A Processing job whose lease ran out was abandoned by its runner
    /// (crash, cancelled caller, shutdown) and can be claimed again.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status.can_start() || self.lease_expires_at.map_or(false, |expires| expires < now)
    }
}

/// Insert payload for a job in Waiting.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub kind: JobKind,
    pub inputs: JobInputs,
}

impl NewJob {
    pub fn new(owner_id: OwnerId, kind: JobKind, inputs: JobInputs) -> Self {
        Self {
            id: JobId::new(),
            owner_id,
            kind,
            inputs,
        }
    }

    pub fn into_job(self, now: DateTime<Utc>) -> GenerationJob {
        GenerationJob {
            id: self.id,
            owner_id: self.owner_id,
            kind: self.kind,
            inputs: Json(self.inputs),
            status: JobStatus::Waiting,
            result_payload: None,
            degraded: false,
            error_message: None,
            attempt: 0,
            lease_expires_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Done write for one attempt, applied together with its charge.
#[derive(Debug, Clone)]
pub struct Completion {
    pub job_id: JobId,
    pub owner_id: OwnerId,
    pub attempt: i32,
    pub payload: Value,
    pub degraded: bool,
    pub charge: i64,
}

/// What happens to the previous result when a finished job is started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultRetention {
    /// Start wipes the old payload; a reader never sees a stale result.
    #[default]
    ClearAtStart,
    /// The old payload stays readable until the next Done replaces it.
    KeepUntilReplaced,
}

impl FromStr for ResultRetention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear_at_start" => Ok(ResultRetention::ClearAtStart),
            "keep_until_replaced" => Ok(ResultRetention::KeepUntilReplaced),
            other => Err(format!(
                "unknown result retention '{}', expected clear_at_start or keep_until_replaced",
                other
            )),
        }
    }
}

/// Listing filter. Results are newest first.
#[derive(Debug, Clone, TypedBuilder)]
pub struct JobFilter {
    #[builder(default, setter(strip_option))]
    pub kind: Option<JobKind>,
    #[builder(default, setter(strip_option))]
    pub status: Option<JobStatus>,
    #[builder(default = 50)]
    pub limit: i64,
    #[builder(default = 0)]
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl JobFilter {
    pub const MAX_LIMIT: i64 = 200;

    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    pub fn clamped_offset(&self) -> i64 {
        self.offset.max(0)
    }

    pub fn matches(&self, job: &GenerationJob) -> bool {
        self.kind.map_or(true, |kind| job.kind == kind)
            && self.status.map_or(true, |status| job.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_processing_blocks_start() {
        assert!(JobStatus::Waiting.can_start());
        assert!(JobStatus::Done.can_start());
        assert!(JobStatus::Error.can_start());
        assert!(!JobStatus::Processing.can_start());
    }

    #[test]
    fn expired_lease_makes_processing_claimable() {
        let now = Utc::now();
        let mut job = NewJob::new(OwnerId::new(), JobKind::MarketAnalysis, JobInputs::default())
            .into_job(now);
        assert!(job.is_claimable(now));

        job.status = JobStatus::Processing;
        job.lease_expires_at = Some(now + chrono::Duration::seconds(30));
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + chrono::Duration::seconds(31)));

        job.lease_expires_at = None;
        assert!(!job.is_claimable(now + chrono::Duration::days(1)));
    }

    #[test]
    fn retention_parses_env_values() {
        assert_eq!("clear_at_start".parse::<ResultRetention>(), Ok(ResultRetention::ClearAtStart));
        assert_eq!(" KEEP_UNTIL_REPLACED ".parse::<ResultRetention>(), Ok(ResultRetention::KeepUntilReplaced));
        assert!("forever".parse::<ResultRetention>().is_err());
    }

    #[test]
    fn filter_defaults_and_clamps() {
        let filter = JobFilter::default();
        assert_eq!(filter.limit, 50);
        assert!(filter.kind.is_none());

        let filter = JobFilter::builder().limit(10_000).offset(-5).build();
        assert_eq!(filter.clamped_limit(), JobFilter::MAX_LIMIT);
        assert_eq!(filter.clamped_offset(), 0);
    }
}
