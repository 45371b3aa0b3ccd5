//! Job orchestrator.
//!
//! ```text
//! start ─► checks (owner, status, inputs, credential, credit, pool slot)
//!       ─► CAS {Waiting,Done,Error} -> Processing
//!       ─► acquire inputs ─► generate ─► extract ─► Done + debit | Error
//! ```
//!
//! Every check that can fail without side effects runs before the
//! compare-and-set, so a rejected Start leaves the job exactly as it was.
//! Interactive kinds run in a task the caller awaits, so a dropped caller
//! does not abandon the attempt; Start returns the terminal job. Background
//! kinds are handed to the worker pool and Start returns the job in Processing.
//! A runner that vanishes anyway (crash, drain timeout) leaves a lease behind,
//! and once it expires the job may be started again.

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::Utc;
use extraction::{snippet, ExtractionEngine, ExtractionResult, ResultShape};
use generation_client::{AttachedImage, GenerationAdapter, GenerationRequest};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn, Instrument};
use typed_builder::TypedBuilder;

use super::error::{JobError, StoreError};
use super::models::{
    Completion, ExecutionMode, GenerationJob, ImageSource, JobFilter, JobInputs, JobKind,
    KindProfile, ModelTier, NewJob, ResultRetention,
};
use super::store::JobStore;
use crate::common::{JobId, OwnerId};
use crate::domains::credits::{CreditError, CreditLedger, GENERATION_COST};
use crate::kernel::file_store::{sniff_image_mime, FileStore, ScopedFiles};
use crate::kernel::worker_pool::{PoolError, WorkerPool};

/// Stored when the charge bundled with a Done write is refused.
pub const CREDIT_CHANGED_MESSAGE: &str = "credit balance changed during processing";

const SAVE_FAILED_MESSAGE: &str = "the result could not be saved";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub text_model: String,
    pub image_model: String,
    pub retention: ResultRetention,
    /// How long a Processing claim holds before another Start may take over
    pub lease: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            text_model: "google/gemini-2.5-flash".to_string(),
            image_model: "google/gemini-2.5-flash-image-preview".to_string(),
            retention: ResultRetention::default(),
            lease: Duration::from_secs(600),
        }
    }
}

impl OrchestratorSettings {
    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Text => &self.text_model,
            ModelTier::Image => &self.image_model,
        }
    }
}

/// A usable result for a Done write.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedResult {
    pub payload: Value,
    /// Fallback substituted for an unresolved extraction
    pub degraded: bool,
}

#[derive(Clone, TypedBuilder)]
pub struct JobOrchestrator {
    jobs: Arc<dyn JobStore>,
    ledger: CreditLedger,
    adapter: Arc<dyn GenerationAdapter>,
    files: Arc<dyn FileStore>,
    pool: Arc<WorkerPool>,
    #[builder(default)]
    engine: ExtractionEngine,
    #[builder(default)]
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    // =========================================================================
    // Queries
    // =========================================================================

    /// Fetch a job owned by `owner`. Other owners' jobs are reported missing.
    pub async fn get(&self, owner: OwnerId, id: JobId) -> Result<GenerationJob, JobError> {
        let job = self.jobs.get(id).await?;
        if job.owner_id != owner {
            return Err(JobError::NotFound(id));
        }
        Ok(job)
    }

    pub async fn list(
        &self,
        owner: OwnerId,
        filter: &JobFilter,
    ) -> Result<Vec<GenerationJob>, JobError> {
        Ok(self.jobs.list(owner, filter).await?)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// New job in Waiting. Inputs are checked against the kind's profile.
    #[instrument(skip_all, fields(owner_id = %owner, kind = %kind))]
    pub async fn create(
        &self,
        owner: OwnerId,
        kind: JobKind,
        inputs: JobInputs,
    ) -> Result<GenerationJob, JobError> {
        kind.profile()
            .validate(&inputs)
            .map_err(JobError::InvalidInput)?;

        let job = self.jobs.create(NewJob::new(owner, kind, inputs)).await?;
        info!(job_id = %job.id, "Created generation job");
        Ok(job)
    }

    /// Run (or re-run) a job.
    ///
    /// Returns the terminal job for interactive kinds and the Processing job
    /// for background kinds. A runtime failure is recorded on the job and is
    /// not an `Err`; `Err` means nothing was started.
    #[instrument(skip_all, fields(owner_id = %owner, job_id = %id))]
    pub async fn start(&self, owner: OwnerId, id: JobId) -> Result<GenerationJob, JobError> {
        let job = self.get(owner, id).await?;
        if !job.is_claimable(Utc::now()) {
            return Err(JobError::AlreadyProcessing(id));
        }

        let profile = job.kind.profile();
        profile
            .validate(job.inputs())
            .map_err(JobError::InvalidInput)?;
        self.adapter.ensure_configured()?;
        self.ledger.check_available(owner).await?;

        match profile.mode {
            ExecutionMode::Interactive => {
                let job = self
                    .jobs
                    .begin_processing(id, self.settings.retention, self.settings.lease)
                    .await?;
                info!(attempt = job.attempt, kind = %job.kind, "Job processing");

                // Detached from the caller: dropping this future must not
                // strand the job in Processing.
                let this = self.clone();
                tokio::spawn(async move { this.run(job).await }.in_current_span())
                    .await
                    .map_err(|e| JobError::Internal(format!("job runner aborted: {}", e)))?
            }
            ExecutionMode::Background => {
                let permit = self.pool.try_reserve().map_err(|e| match e {
                    PoolError::Saturated => JobError::Busy,
                    PoolError::ShutDown => JobError::Internal(e.to_string()),
                })?;
                // The reserved slot is released if this fails.
                let job = self
                    .jobs
                    .begin_processing(id, self.settings.retention, self.settings.lease)
                    .await?;
                info!(attempt = job.attempt, kind = %job.kind, "Job queued for background processing");

                let this = self.clone();
                let queued = job.clone();
                permit.spawn(async move {
                    let job_id = queued.id;
                    if let Err(e) = this.run(queued).await {
                        error!(job_id = %job_id, error = %e, "Background job could not be finalized");
                    }
                });
                Ok(job)
            }
        }
    }

    /// `Processing -> Done`, charging the owner atomically with the write.
    ///
    /// If the charge is refused the job goes to Error instead and nothing is
    /// debited.
    pub async fn complete(
        &self,
        job: &GenerationJob,
        result: ProducedResult,
    ) -> Result<GenerationJob, JobError> {
        let completion = Completion {
            job_id: job.id,
            owner_id: job.owner_id,
            attempt: job.attempt,
            payload: result.payload,
            degraded: result.degraded,
            charge: GENERATION_COST,
        };

        match self.jobs.complete(completion).await {
            Ok(done) => {
                info!(
                    job_id = %done.id,
                    attempt = done.attempt,
                    degraded = done.degraded,
                    "Job done"
                );
                Ok(done)
            }
            Err(StoreError::Credit(
                e @ (CreditError::ConcurrencyViolation { .. } | CreditError::AccountNotFound(_)),
            )) => {
                warn!(job_id = %job.id, error = %e, "Charge refused at completion");
                self.fail_with_message(job, CREDIT_CHANGED_MESSAGE).await
            }
            Err(e @ StoreError::StaleTransition { .. }) => Err(JobError::Internal(e.to_string())),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record job completion");
                if let Err(fail_err) = self.fail_with_message(job, SAVE_FAILED_MESSAGE).await {
                    error!(job_id = %job.id, error = %fail_err, "Failed to record job failure");
                }
                Err(e.into())
            }
        }
    }

    /// `Processing -> Error`. No charge.
    pub async fn fail(&self, job: &GenerationJob, err: &JobError) -> Result<GenerationJob, JobError> {
        self.fail_with_message(job, &err.to_string()).await
    }

    async fn fail_with_message(
        &self,
        job: &GenerationJob,
        message: &str,
    ) -> Result<GenerationJob, JobError> {
        let failed = self.jobs.fail(job.id, job.attempt, message).await?;
        warn!(job_id = %job.id, attempt = job.attempt, error = %message, "Job failed");
        Ok(failed)
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    /// Drive one attempt to a terminal state. Temporary files are released on
    /// every path.
    async fn run(&self, job: GenerationJob) -> Result<GenerationJob, JobError> {
        let profile = job.kind.profile();
        let mut files = ScopedFiles::new(self.files.clone());
        let produced = self.produce(&job, profile, &mut files).await;
        files.release().await;

        match produced {
            Ok(result) => self.complete(&job, result).await,
            Err(err) => self.fail(&job, &err).await,
        }
    }

    async fn produce(
        &self,
        job: &GenerationJob,
        profile: &KindProfile,
        files: &mut ScopedFiles,
    ) -> Result<ProducedResult, JobError> {
        let mut request = GenerationRequest::new(
            self.settings.model_for(profile.model),
            profile.render_prompt(job.inputs()),
        );

        let mut fallback_image = None;
        for image in &job.inputs().images {
            let acquired = match &image.source {
                ImageSource::Url { url } => files.acquire_url(url).await,
                ImageSource::Stored { key } => files.acquire_stored(key).await,
            };
            let bytes = acquired
                .map_err(|e| JobError::InvalidInput(format!("image '{}': {}", image.label, e)))?;

            if fallback_image.is_none() {
                fallback_image = Some(displayable_reference(&image.source, &bytes));
            }
            request = request.image(AttachedImage::new(image.label.clone(), bytes));
        }

        debug!(
            job_id = %job.id,
            model = %request.model,
            images = request.attached_images.len(),
            "Calling generation backend"
        );
        let response = self.adapter.generate(request).await?;
        let envelope = response.envelope.to_value();

        let extracted = self.engine.extract(profile.shape, &envelope);
        self.interpret(job, profile, extracted, fallback_image)
    }

    /// Turn an extraction outcome into a storable result, substituting the
    /// kind's fallback when nothing usable came back.
    fn interpret(
        &self,
        job: &GenerationJob,
        profile: &KindProfile,
        extracted: ExtractionResult,
        fallback_image: Option<String>,
    ) -> Result<ProducedResult, JobError> {
        let (payload, degraded) = match extracted {
            ExtractionResult::Json(value) => (value, false),
            ExtractionResult::Media(reference) => (json!({ "image": reference }), false),
            ExtractionResult::Unresolved(text) => {
                warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    raw = %snippet(&text, 200),
                    "Extraction unresolved, substituting fallback"
                );
                match profile.shape {
                    ResultShape::Structured => (profile.placeholder(), true),
                    ResultShape::Media => {
                        let reference = fallback_image.ok_or_else(|| {
                            JobError::Internal("no input image available as fallback".to_string())
                        })?;
                        (json!({ "image": reference }), true)
                    }
                }
            }
        };
        Ok(ProducedResult { payload, degraded })
    }
}

/// URL for remote inputs, otherwise a data URI of the bytes.
fn displayable_reference(source: &ImageSource, bytes: &[u8]) -> String {
    match source.public_url() {
        Some(url) => url.to_string(),
        None => format!(
            "data:{};base64,{}",
            sniff_image_mime(bytes).unwrap_or("image/png"),
            BASE64_STANDARD.encode(bytes)
        ),
    }
}
