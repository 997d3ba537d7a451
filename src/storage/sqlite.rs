use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::models::TransactionRecord;
use crate::storage::RecordSink;

/// SQLite output keyed by `(transaction_id, event_index)`. Replaying a window inserts
/// nothing new, which makes re-runs over the same range idempotent.
#[derive(Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub async fn connect(database_url: &str) -> Result<Self> {
        ensure_dir_exists(database_url)?;

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {}", database_url))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite")?;

        apply_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transfer_events;")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn earliest_block_timestamp(&self) -> Result<Option<i64>> {
        let (ts,): (Option<i64>,) =
            sqlx::query_as("SELECT MIN(block_timestamp) FROM transfer_events;")
                .fetch_one(&self.pool)
                .await?;
        Ok(ts)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<TransactionRecord>> {
        #[derive(FromRow)]
        struct Row {
            transaction_id: String,
            event_index: i64,
            block_timestamp: i64,
            block_number: i64,
            contract_address: String,
            event_name: String,
            from_address: String,
            to_address: String,
            amount: String,
        }

        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT transaction_id, event_index, block_timestamp, block_number,
                   contract_address, event_name, from_address, to_address, amount
            FROM transfer_events
            ORDER BY block_timestamp DESC, transaction_id, event_index
            LIMIT ?1;
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<TransactionRecord> {
                Ok(TransactionRecord {
                    event_index: u32::try_from(row.event_index).with_context(|| {
                        format!(
                            "event_index {} out of range for {}",
                            row.event_index, row.transaction_id
                        )
                    })?,
                    block_number: u64::try_from(row.block_number).with_context(|| {
                        format!(
                            "block_number {} out of range for {}",
                            row.block_number, row.transaction_id
                        )
                    })?,
                    transaction_id: row.transaction_id,
                    block_timestamp: row.block_timestamp,
                    contract_address: row.contract_address,
                    event_name: row.event_name,
                    from_address: row.from_address,
                    to_address: row.to_address,
                    amount: row.amount,
                })
            })
            .collect()
    }
}

impl RecordSink for SqliteSink {
    async fn write_batch(&mut self, records: &[TransactionRecord]) -> Result<()> {
        let mut txn = self.pool.begin().await?;

        for record in records {
            let block_number = i64::try_from(record.block_number).with_context(|| {
                format!(
                    "block_number {} of {} does not fit in SQLite INTEGER",
                    record.block_number, record.transaction_id
                )
            })?;
            sqlx::query(
                r#"
                INSERT INTO transfer_events (
                    transaction_id, event_index, block_timestamp, block_number,
                    contract_address, event_name, from_address, to_address, amount
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(transaction_id, event_index) DO NOTHING;
                "#,
            )
            .bind(&record.transaction_id)
            .bind(i64::from(record.event_index))
            .bind(record.block_timestamp)
            .bind(block_number)
            .bind(&record.contract_address)
            .bind(&record.event_name)
            .bind(&record.from_address)
            .bind(&record.to_address)
            .bind(&record.amount)
            .execute(&mut *txn)
            .await?;
        }

        txn.commit().await?;
        Ok(())
    }
}

fn ensure_dir_exists(database_url: &str) -> Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if path != ":memory:" {
            if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed creating db directory {:?}", dir))?;
            }
        }
    }
    Ok(())
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfer_events (
            transaction_id TEXT NOT NULL,
            event_index INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            contract_address TEXT NOT NULL,
            event_name TEXT NOT NULL,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            amount TEXT NOT NULL,
            PRIMARY KEY (transaction_id, event_index)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_transfer_events_timestamp ON transfer_events(block_timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, ts: i64) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id.to_string(),
            event_index: 0,
            block_timestamp: ts,
            block_number: 9,
            contract_address: "TR7".to_string(),
            event_name: "Transfer".to_string(),
            from_address: "0xaaa".to_string(),
            to_address: "0xbbb".to_string(),
            amount: "115792089237316195423570985008687907853269984665640564039457584007913129639935"
                .to_string(),
        }
    }

    #[tokio::test]
    async fn replayed_batches_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("db").join("events.sqlite").display());
        let mut sink = SqliteSink::connect(&url).await.unwrap();

        sink.write_batch(&[record("a", 300), record("b", 200)]).await.unwrap();
        sink.write_batch(&[record("b", 200), record("c", 100)]).await.unwrap();

        assert_eq!(sink.count().await.unwrap(), 3);
        assert_eq!(sink.earliest_block_timestamp().await.unwrap(), Some(100));

        let recent = sink.recent(2).await.unwrap();
        assert_eq!(recent, vec![record("a", 300), record("b", 200)]);
    }

    #[tokio::test]
    async fn block_number_beyond_integer_range_is_rejected() {
        let mut sink = SqliteSink::connect("sqlite::memory:").await.unwrap();
        let mut huge = record("huge", 1);
        huge.block_number = u64::MAX;

        let err = sink.write_batch(&[record("ok", 2), huge]).await.unwrap_err();
        assert!(err.to_string().contains("block_number"), "{}", err);
        // The batch is written in one transaction, so nothing from it lands.
        assert_eq!(sink.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn out_of_range_rows_are_reported_on_read() {
        let sink = SqliteSink::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            r#"
            INSERT INTO transfer_events (
                transaction_id, event_index, block_timestamp, block_number,
                contract_address, event_name, from_address, to_address, amount
            )
            VALUES ('neg', -1, 5, 9, 'TR7', 'Transfer', '0xaaa', '0xbbb', '1');
            "#,
        )
        .execute(&sink.pool)
        .await
        .unwrap();

        let err = sink.recent(10).await.unwrap_err();
        assert!(err.to_string().contains("event_index -1"), "{}", err);
    }
}
