use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::models::TransactionRecord;
use crate::storage::RecordSink;

const HEADER: [&str; 9] = [
    "transaction_id",
    "event_index",
    "block_timestamp",
    "block_number",
    "contract_address",
    "event_name",
    "from_address",
    "to_address",
    "amount",
];

/// Append-only CSV output. The header is written only when the file starts out empty,
/// so reopening an existing file for a resumed run keeps it valid.
pub struct CsvSink {
    path: PathBuf,
    writer: ::csv::Writer<File>,
}

impl CsvSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed creating output directory {:?}", dir))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(HEADER)?;
            writer.flush()?;
        } else {
            info!("Appending to existing output '{}'", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvSink {
    async fn write_batch(&mut self, records: &[TransactionRecord]) -> Result<()> {
        for record in records {
            self.writer
                .serialize(record)
                .with_context(|| format!("failed writing row to {}", self.path.display()))?;
        }
        self.writer
            .flush()
            .with_context(|| format!("failed flushing {}", self.path.display()))?;
        Ok(())
    }
}
