mod inputs;
mod job;
mod profile;

pub use inputs::{ImageRef, ImageSource, JobInputs};
pub use job::{Completion, GenerationJob, JobFilter, JobStatus, NewJob, ResultRetention};
pub use profile::{ExecutionMode, JobKind, KindProfile, ModelTier};
