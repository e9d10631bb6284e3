//! Database connection management

use crate::config::DatabaseConfig;
use crate::domain::shared::error::CallError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

/// Create the PostgreSQL connection pool
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!("Connecting to {} (max {} connections)", redact_url(&config.url), config.max_connections);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Some(Duration::from_secs(600)))
        .connect(&config.url)
        .await?;

    info!("Database connection pool ready");
    Ok(pool)
}

/// Apply the SQL migrations in `./migrations`
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

/// Map a driver error to the persistence failure the core understands
pub(crate) fn db_error(what: &str) -> impl Fn(sqlx::Error) -> CallError + '_ {
    move |e| {
        error!("Database error during {}: {}", what, e);
        CallError::PersistenceFailure(format!("{}: {}", what, e))
    }
}

/// Hide the password of a connection URL for logging
fn redact_url(url: &str) -> String {
    let Some(at) = url.find('@') else {
        return url.to_string();
    };
    let scheme_end = url.find("://").map_or(0, |i| i + 3);
    match url[scheme_end..at].find(':') {
        Some(colon) => format!("{}****{}", &url[..scheme_end + colon + 1], &url[at..]),
        None => url.to_string(),
    }
}
