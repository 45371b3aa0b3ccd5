mod account;
mod transaction;

pub use account::CreditAccount;
pub use transaction::{ChargeRef, CreditReason, CreditTransaction};
