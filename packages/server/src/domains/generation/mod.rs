//! Generation jobs: lifecycle, persistence and the orchestrator that drives
//! backend calls, extraction and charging.

pub mod error;
pub mod models;
pub mod orchestrator;
pub mod store;

pub use error::{JobError, StoreError};
pub use models::{
    ExecutionMode, GenerationJob, ImageRef, ImageSource, JobFilter, JobInputs, JobKind, JobStatus,
    KindProfile, ResultRetention,
};
pub use orchestrator::{JobOrchestrator, OrchestratorSettings, ProducedResult};
pub use store::{JobStore, PostgresJobStore};
