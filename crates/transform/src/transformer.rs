//! Per-record transformation: identity resolution, validation, upsert.
//!
//! All writes go through the caller's transaction so one source batch
//! commits atomically. A record that fails to parse or validate is logged
//! to `transform_failures` and reported as a per-record failure; only
//! database faults propagate.

use anyhow::Result;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::observation::{parse_observation, TransformError};
use marketflow_core::SourceKind;
use marketflow_data::models::RawRecord;
use marketflow_data::normalized;

/// Resolves the internal asset id for an external `(source, id)` pair.
///
/// Resolution order: existing source mapping, then asset by symbol, then a
/// freshly minted asset. Either way the source mapping is inserted, so the
/// same external id maps to the same asset on every later run.
///
/// # Errors
/// Returns an error if any database operation fails.
pub async fn resolve_asset_id(
    conn: &mut PgConnection,
    source: &str,
    source_asset_id: &str,
    symbol: &str,
    name: &str,
) -> Result<Uuid> {
    if let Some(asset_id) = normalized::find_asset_id_by_source(conn, source, source_asset_id).await?
    {
        return Ok(asset_id);
    }

    let asset_id = match normalized::find_asset_id_by_symbol(conn, symbol).await? {
        Some(existing) => existing,
        None => {
            let minted = Uuid::new_v4();
            normalized::insert_asset(conn, minted, symbol, name).await?;
            minted
        }
    };

    normalized::insert_asset_source(conn, asset_id, source, source_asset_id).await?;
    Ok(asset_id)
}

/// Transforms one raw record into the normalized model.
///
/// Returns `Ok(true)` on success and `Ok(false)` when the record was
/// rejected and logged; a record failure never aborts the batch.
///
/// # Errors
/// Returns an error only for database faults.
pub async fn transform_record(
    conn: &mut PgConnection,
    source: SourceKind,
    record: &RawRecord,
    run_id: Uuid,
) -> Result<bool> {
    let observation = match parse_observation(source, &record.payload) {
        Ok(observation) => observation,
        Err(e) => {
            record_failure(conn, source, record, run_id, &e).await?;
            return Ok(false);
        }
    };

    let asset_id = resolve_asset_id(
        conn,
        source.label(),
        &observation.source_asset_id,
        &observation.symbol,
        &observation.name,
    )
    .await?;

    if let Err(e) = observation.validate() {
        record_failure(conn, source, record, run_id, &e).await?;
        return Ok(false);
    }

    // Conflict on (asset_id, source, last_updated) is a silent no-op;
    // re-running the transform is idempotent.
    normalized::insert_market_data(
        conn,
        asset_id,
        source.label(),
        observation.price_usd,
        observation.market_cap_usd,
        observation.volume_24h_usd,
        observation.last_updated,
    )
    .await?;

    Ok(true)
}

async fn record_failure(
    conn: &mut PgConnection,
    source: SourceKind,
    record: &RawRecord,
    run_id: Uuid,
    error: &TransformError,
) -> Result<()> {
    tracing::warn!(
        source = source.name(),
        raw_id = %record.id,
        %run_id,
        error = %error,
        "transform record rejected"
    );

    normalized::insert_transform_failure(
        conn,
        source.label(),
        source.raw_table(),
        record.id,
        run_id,
        error.error_type(),
        &error.to_string(),
        &record.payload,
    )
    .await
}
