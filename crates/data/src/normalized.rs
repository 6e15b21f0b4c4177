//! Writes to the normalized schema, used inside the per-source transform
//! transaction.
//!
//! These take a `PgConnection` rather than the pool so identity resolution
//! and the market-data upsert for one batch share a single transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::PgConnection;
use uuid::Uuid;

/// Looks up the internal asset id mapped to an external `(source, id)` pair.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn find_asset_id_by_source(
    conn: &mut PgConnection,
    source: &str,
    source_asset_id: &str,
) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT asset_id FROM asset_sources
        WHERE source = $1 AND source_asset_id = $2
        "#,
    )
    .bind(source)
    .bind(source_asset_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Looks up an asset by symbol.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn find_asset_id_by_symbol(
    conn: &mut PgConnection,
    symbol: &str,
) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT asset_id FROM assets WHERE symbol = $1 LIMIT 1
        "#,
    )
    .bind(symbol)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Inserts a new asset.
///
/// # Errors
/// Returns an error if the database operation fails.
pub async fn insert_asset(
    conn: &mut PgConnection,
    asset_id: Uuid,
    symbol: &str,
    name: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assets (asset_id, symbol, name)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(asset_id)
    .bind(symbol)
    .bind(name)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Links an external `(source, id)` pair to an internal asset id.
///
/// # Errors
/// Returns an error if the database operation fails.
pub async fn insert_asset_source(
    conn: &mut PgConnection,
    asset_id: Uuid,
    source: &str,
    source_asset_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO asset_sources (asset_id, source, source_asset_id, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(asset_id)
    .bind(source)
    .bind(source_asset_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Upserts one market-data point. A collision on
/// `(asset_id, source, last_updated)` is a silent no-op, so re-running a
/// transform over the same raw record is idempotent.
///
/// # Errors
/// Returns an error if the database operation fails.
#[allow(clippy::too_many_arguments)]
pub async fn insert_market_data(
    conn: &mut PgConnection,
    asset_id: Uuid,
    source: &str,
    price_usd: Decimal,
    market_cap_usd: Option<Decimal>,
    volume_24h_usd: Option<Decimal>,
    last_updated: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO asset_market_data
            (asset_id, source, price_usd, market_cap_usd, volume_24h_usd,
             last_updated, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (asset_id, source, last_updated) DO NOTHING
        "#,
    )
    .bind(asset_id)
    .bind(source)
    .bind(price_usd)
    .bind(market_cap_usd)
    .bind(volume_24h_usd)
    .bind(last_updated)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Records a per-record transform failure for diagnostics. Never blocks the
/// batch.
///
/// # Errors
/// Returns an error if the database operation fails.
#[allow(clippy::too_many_arguments)]
pub async fn insert_transform_failure(
    conn: &mut PgConnection,
    source: &str,
    raw_table: &str,
    raw_id: Uuid,
    run_id: Uuid,
    error_type: &str,
    error_message: &str,
    payload: &JsonValue,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transform_failures
            (source, raw_table, raw_id, run_id, failed_at, error_type,
             error_message, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(source)
    .bind(raw_table)
    .bind(raw_id)
    .bind(run_id)
    .bind(Utc::now())
    .bind(error_type)
    .bind(error_message)
    .bind(payload)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
