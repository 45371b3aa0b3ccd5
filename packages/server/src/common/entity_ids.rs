//! Typed ids for every persisted entity.

pub use super::id::Id;

/// Marker for the authenticated principal that owns jobs and credit.
pub struct Owner;

/// Marker for generation jobs.
pub struct Job;

/// Marker for credit ledger entries.
pub struct CreditTransaction;

pub type OwnerId = Id<Owner>;
pub type JobId = Id<Job>;
pub type CreditTransactionId = Id<CreditTransaction>;
