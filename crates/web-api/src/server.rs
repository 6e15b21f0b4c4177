use crate::handlers::{self, ApiState};
use axum::{routing::get, Router};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use marketflow_core::SourcesConfig;
use marketflow_data::ReportingQueries;

pub struct ApiServer {
    state: Arc<ApiState>,
}

impl ApiServer {
    #[must_use]
    pub fn new(pool: PgPool, sources: SourcesConfig) -> Self {
        Self {
            state: Arc::new(ApiState {
                queries: ReportingQueries::new(pool),
                sources,
            }),
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::health))
            .route("/stats", get(handlers::stats))
            .route("/runs", get(handlers::runs))
            .route("/data", get(handlers::market_data))
            .route("/compare-runs", get(handlers::compare_runs))
            .route("/metrics", get(handlers::metrics))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Starts the reporting API listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Reporting API listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
