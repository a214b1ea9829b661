//! Bank reconciliation
//!
//! Statement lines are imported per bank account with de-duplication, then
//! matched to posted ledger transactions or to open invoices, bills and
//! expenses. A match is stored on the bank line as a single
//! [`Reconciliation`] value.

pub mod bank;
pub mod engine;
pub mod matcher;

pub use bank::*;
pub use engine::*;
pub use matcher::{MatchCandidate, MatchSuggestion};
