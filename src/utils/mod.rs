//! Utility modules

pub mod memory_documents;
pub mod memory_storage;
pub mod validation;

pub use memory_documents::*;
pub use memory_storage::*;
pub use validation::*;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install a global `fmt` subscriber once. `RUST_LOG` overrides the default
/// `general_ledger=info` filter.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("general_ledger=info"));
        let _ = fmt().with_env_filter(filter).with_target(true).try_init();
    });
}
