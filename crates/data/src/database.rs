use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connects to the specified `PostgreSQL` database.
///
/// The pool is constructed once at startup and passed down explicitly;
/// nothing in this workspace holds a process-wide database handle.
///
/// # Errors
/// Returns an error if the database connection cannot be established.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Applies the schema migrations bundled with the workspace.
///
/// # Errors
/// Returns an error if any migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
