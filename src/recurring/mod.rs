//! Recurring journals and invoices
//!
//! A recurring definition pairs a template with a [`Schedule`]. A
//! [`RecurringManager`] owns the definition lifecycle
//! (`active ⇄ paused`, `active → completed`, `active/paused → cancelled`) and
//! generates occurrences through a [`Materializer`]; the [`Scheduler`] polls
//! every registered manager on an interval.

pub mod definition;
pub mod manager;
pub mod schedule;
pub mod scheduler;

pub use definition::*;
pub use manager::*;
pub use schedule::*;
pub use scheduler::*;
