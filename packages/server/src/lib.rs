// Generation Studio - Core
//
// Generation jobs against a multimodal backend, billed per completed run
// from a per-owner credit ledger. Jobs run inline or on the background
// worker pool depending on their kind.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
