//! Raw-record persistence and ordered replay.
//!
//! One append-only table per source. `(source_id, payload_hash)` is unique:
//! identical content from the same external entity is stored once, while the
//! same content under a different external id is a new record.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgConnection, PgPool};

use crate::models::RawRecord;
use marketflow_core::SourceKind;

/// Inserts a raw record inside the caller's transaction, returning `false`
/// if an identical `(source_id, payload_hash)` pair is already stored.
///
/// Taking a `PgConnection` keeps all inserts for one ingestion run in a
/// single transaction, so a run that fails partway leaves no rows behind.
///
/// # Errors
/// Returns an error if the database operation fails.
pub async fn insert(
    conn: &mut PgConnection,
    source: SourceKind,
    source_id: &str,
    payload: &JsonValue,
    payload_hash: &str,
    ingested_at: DateTime<Utc>,
) -> Result<bool> {
    // Table names come from SourceKind, never from input.
    let query = format!(
        r#"
        INSERT INTO {} (source_id, payload, payload_hash, ingested_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (source_id, payload_hash) DO NOTHING
        "#,
        source.raw_table()
    );

    let result = sqlx::query(&query)
        .bind(source_id)
        .bind(payload)
        .bind(payload_hash)
        .bind(ingested_at)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Store for the per-source raw tables.
#[derive(Debug, Clone)]
pub struct RawRecordStore {
    pool: PgPool,
}

impl RawRecordStore {
    /// Creates a new store backed by the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replays raw records for a source in ascending ingestion order.
    ///
    /// With `since` set, only records ingested strictly after it are
    /// returned. The ordering keeps downstream "latest wins" behavior
    /// deterministic across repeated transforms.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn load_since(
        &self,
        source: SourceKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>> {
        let records = match since {
            Some(since) => {
                let query = format!(
                    r#"
                    SELECT id, source_id, payload, payload_hash, ingested_at
                    FROM {}
                    WHERE ingested_at > $1
                    ORDER BY ingested_at ASC
                    "#,
                    source.raw_table()
                );
                sqlx::query_as::<_, RawRecord>(&query)
                    .bind(since)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    r#"
                    SELECT id, source_id, payload, payload_hash, ingested_at
                    FROM {}
                    ORDER BY ingested_at ASC
                    "#,
                    source.raw_table()
                );
                sqlx::query_as::<_, RawRecord>(&query)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Run with: DATABASE_URL=... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_rolled_back_inserts_leave_no_rows() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("connect");
        crate::database::run_migrations(&pool).await.expect("migrate");

        let mut tx = pool.begin().await.expect("begin");
        let is_new = insert(
            &mut tx,
            SourceKind::CsvMarketData,
            "ROLLBACK-TEST-SYMBOL",
            &json!({"Symbol": "XXX"}),
            "0000000000000000000000000000000000000000000000000000000000000000",
            Utc::now(),
        )
        .await
        .expect("insert");
        assert!(is_new);
        tx.rollback().await.expect("rollback");

        let store = RawRecordStore::new(pool);
        let rows = store
            .load_since(SourceKind::CsvMarketData, None)
            .await
            .expect("load");
        assert!(rows.iter().all(|r| r.source_id != "ROLLBACK-TEST-SYMBOL"));
    }
}
