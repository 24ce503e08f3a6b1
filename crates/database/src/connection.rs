use crate::error::DbError;
use configuration::DatabaseSettings;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// The connection string is read from the environment variable named by
/// `settings.url_env` (normally `DATABASE_URL`); a `.env` file is loaded first if present.
pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, DbError> {
    // A missing .env is fine; the variable may come from the real environment.
    let _ = dotenvy::dotenv();

    let database_url = env::var(&settings.url_env).map_err(|_e| {
        DbError::ConnectionConfigError(format!("{} must be set.", settings.url_env))
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect(&database_url)
        .await?;

    tracing::info!(max_connections = settings.max_connections, "Database pool ready.");
    Ok(pool)
}

/// Applies the embedded migrations for the definition store and execution journal.
///
/// The warehouse tables (`deal`, `tranche`, `tranchebal`) are owned elsewhere and are
/// never created or altered here.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
