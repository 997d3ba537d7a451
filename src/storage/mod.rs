pub mod csv;
pub mod sqlite;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::models::TransactionRecord;

pub use self::csv::CsvSink;
pub use self::sqlite::SqliteSink;

/// Durable destination for extracted records. Each call must be persisted before it
/// returns, since the engine issues the next request right after.
#[allow(async_fn_in_trait)]
pub trait RecordSink {
    async fn write_batch(&mut self, records: &[TransactionRecord]) -> Result<()>;
}

pub fn output_csv_path(output_dir: &Path, contract_address: &str) -> PathBuf {
    output_dir.join(format!("{}_events.csv", contract_address))
}

/// Collects batches in memory. Handy for callers that post-process records themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<Vec<TransactionRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.batches.iter().flatten()
    }
}

impl RecordSink for MemorySink {
    async fn write_batch(&mut self, records: &[TransactionRecord]) -> Result<()> {
        self.batches.push(records.to_vec());
        Ok(())
    }
}
