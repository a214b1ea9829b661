//! Ledger module containing the chart of accounts and transaction processing

pub mod account;
pub mod core;
pub mod transaction;

pub use self::account::*;
pub use self::core::*;
pub use self::transaction::*;
