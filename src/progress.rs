use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::models::{RecordKey, TransactionRecord};
use crate::params::display_ms;

/// Per-run dedup and resumption state. The seen-set only grows and the watermark only
/// moves backward in time.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    seen: HashSet<RecordKey>,
    earliest_block_timestamp_seen: Option<i64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the tracker with every row of a CSV written by a previous run.
    pub fn resume_from_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("CSV '{}' doesn't exist", path.display());
        }

        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut tracker = Self::new();
        let mut rows = 0usize;

        for row in reader.deserialize::<TransactionRecord>() {
            let record = row.with_context(|| format!("bad row in {}", path.display()))?;
            tracker.observe_timestamp(record.block_timestamp);
            tracker.seen.insert(record.key());
            rows += 1;
        }

        info!(
            "Loaded {} rows ({} unique) from '{}'; earliest timestamp {}",
            rows,
            tracker.seen.len(),
            path.display(),
            tracker
                .earliest_block_timestamp_seen
                .map(display_ms)
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(tracker)
    }

    /// Returns only the records not seen before in this run and marks them seen. The
    /// watermark is updated from the whole batch, duplicates included.
    pub fn remove_already_processed(
        &mut self,
        records: Vec<TransactionRecord>,
    ) -> Vec<TransactionRecord> {
        for record in &records {
            self.observe_timestamp(record.block_timestamp);
        }

        records
            .into_iter()
            .filter(|record| self.seen.insert(record.key()))
            .collect()
    }

    pub fn earliest_block_timestamp_seen(&self) -> Option<i64> {
        self.earliest_block_timestamp_seen
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    fn observe_timestamp(&mut self, ts: i64) {
        self.earliest_block_timestamp_seen = Some(match self.earliest_block_timestamp_seen {
            Some(current) => current.min(ts),
            None => ts,
        });
    }
}
