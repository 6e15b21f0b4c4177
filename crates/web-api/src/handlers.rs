use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use marketflow_core::SourcesConfig;
use marketflow_data::{
    Anomaly, Checkpoint, MarketDataFilter, MarketDataRow, ReportingQueries, RunRecord,
    SourceRunStats,
};

/// Shared state for all reporting handlers.
pub struct ApiState {
    pub queries: ReportingQueries,
    pub sources: SourcesConfig,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub checkpoints: Vec<Checkpoint>,
    pub request_id: Uuid,
    pub api_latency_ms: i64,
}

/// Reports service health: database connectivity plus current checkpoints.
///
/// Returns `"degraded"` status when the database cannot be reached or any
/// source checkpoint is in a failed state; the endpoint itself still answers
/// 200 so probes can read the body.
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let started = std::time::Instant::now();
    let request_id = Uuid::new_v4();

    let database_ok = state.queries.ping().await;
    let checkpoints = if database_ok {
        state.queries.list_checkpoints().await.unwrap_or_default()
    } else {
        Vec::new()
    };
    let healthy = database_ok && !checkpoints.iter().any(Checkpoint::is_failed);

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        database: if database_ok { "ok" } else { "unreachable" },
        checkpoints,
        request_id,
        api_latency_ms: started.elapsed().as_millis() as i64,
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub sources: Vec<SourceRunStats>,
}

/// Per-source run statistics: latest run plus success/failure counts.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the database query fails.
pub async fn stats(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<StatsResponse>, StatusCode> {
    let sources = state.queries.run_stats().await.map_err(|e| {
        tracing::error!("stats query failed: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(StatsResponse { sources }))
}

#[derive(Deserialize)]
pub struct RunsParams {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct RunsResponse {
    pub runs: Vec<RunRecord>,
}

/// Lists recent ETL runs across all sources, newest first.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the database query fails.
pub async fn runs(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<RunsParams>,
) -> Result<Json<RunsResponse>, StatusCode> {
    let limit = params.limit.unwrap_or(10).clamp(1, 100);

    let runs = state.queries.list_runs(limit).await.map_err(|e| {
        tracing::error!("runs query failed: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(RunsResponse { runs }))
}

#[derive(Deserialize)]
pub struct MarketDataParams {
    pub asset_id: Option<Uuid>,
    pub symbol: Option<String>,
    pub source: Option<String>,
    pub from_ts: Option<DateTime<Utc>>,
    pub to_ts: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// When true, returns only the newest row per asset per source and
    /// ignores the pagination and filter parameters.
    pub latest: Option<bool>,
}

#[derive(Serialize)]
pub struct MarketDataResponse {
    pub count: usize,
    pub data: Vec<MarketDataRow>,
}

/// Filtered, paginated market data joined with asset identities.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the database query fails.
pub async fn market_data(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<MarketDataParams>,
) -> Result<Json<MarketDataResponse>, StatusCode> {
    let rows = if params.latest.unwrap_or(false) {
        state.queries.latest_market_data().await
    } else {
        let filter = MarketDataFilter {
            asset_id: params.asset_id,
            symbol: params.symbol,
            source: params.source,
            from_ts: params.from_ts,
            to_ts: params.to_ts,
            limit: params.limit.unwrap_or(50).clamp(1, 500),
            offset: params.offset.unwrap_or(0).max(0),
        };
        state.queries.market_data(&filter).await
    }
    .map_err(|e| {
        tracing::error!("market data query failed: {e:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(MarketDataResponse {
        count: rows.len(),
        data: rows,
    }))
}

#[derive(Serialize)]
pub struct CompareRunsResponse {
    pub anomalies: Vec<Anomaly>,
}

/// Flags anomalies in each source's latest run against its trailing baseline.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if any database query fails.
pub async fn compare_runs(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<CompareRunsResponse>, StatusCode> {
    let anomalies = state
        .queries
        .compare_runs(&state.sources)
        .await
        .map_err(|e| {
            tracing::error!("compare-runs query failed: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(CompareRunsResponse { anomalies }))
}

/// Exposes process metrics in Prometheus text format.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if encoding fails.
pub async fn metrics() -> Result<String, StatusCode> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).map_err(|e| {
        tracing::error!("metrics encoding failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    String::from_utf8(buffer).map_err(|e| {
        tracing::error!("metrics output was not valid UTF-8: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
