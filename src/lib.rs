//! Extracts contract events from TronGrid into append-only output, working around
//! TronGrid's unreliable next-page links on wide time windows.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod models;
pub mod params;
pub mod progress;
pub mod retry;
pub mod storage;

pub use crate::client::TronGridClient;
pub use crate::config::{ExtractionConfig, Network};
pub use crate::engine::{events_for_token, Extracted, ExtractionRequest, Extractor, RunSummary};
pub use crate::error::ExtractorError;
pub use crate::models::TransactionRecord;
pub use crate::progress::ProgressTracker;

/// Installs a fmt subscriber filtered by `RUST_LOG`, defaulting to `info`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}
