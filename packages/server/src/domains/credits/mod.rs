//! Credit domain: per-owner balances and the append-only ledger behind them.
//!
//! Only this domain mutates balances. The job store reaches in through
//! [`store::debit_in_tx`] so a generation charge commits together with the
//! job's Done write.

pub mod error;
pub mod ledger;
pub mod models;
pub mod store;

pub use error::CreditError;
pub use ledger::{CreditLedger, GENERATION_COST};
pub use models::{ChargeRef, CreditAccount, CreditReason, CreditTransaction};
pub use store::{CreditStore, PostgresCreditStore};
