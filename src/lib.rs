//! # General Ledger
//!
//! A multi-tenant general ledger engine: double-entry posting over a chart of
//! accounts, recurring journal and invoice generation, bank statement
//! reconciliation, and receivables/payables aging.
//!
//! ## Features
//!
//! - **Chart of accounts**: hierarchical accounts with a seedable default chart
//! - **Double-entry ledger**: balanced transactions, atomic balance updates, voiding by exact inverse
//! - **Recurring entries**: schedules with month-end clamping, leased generation and catch-up
//! - **Reconciliation**: de-duplicated statement import and confidence-scored matching
//! - **Aging**: receivables and payables bucketed by days past due
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use general_ledger::{Ledger, MemoryStorage};
//! use uuid::Uuid;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let tenant = Uuid::new_v4();
//! let mut ledger = Ledger::new(MemoryStorage::new());
//! let chart = ledger.seed_default_chart(tenant).await.unwrap();
//! assert!(chart.contains_key("cash"));
//! # });
//! # }
//! ```

pub mod aging;
pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod recurring;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use aging::*;
pub use self::config::*;
pub use ledger::*;
pub use reconciliation::*;
pub use recurring::*;
pub use traits::*;
pub use types::*;
pub use utils::{init_tracing, MemoryDocuments, MemoryStorage};

// Re-export transaction patterns for convenience
pub use ledger::transaction::patterns;
