//! PostgreSQL pool and schema setup.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");
    Ok(pool)
}

/// Apply `tenant-api/migrations` when enabled in config.
pub async fn prepare_schema(
    pool: &PgPool,
    config: &DatabaseConfig,
) -> Result<(), sqlx::migrate::MigrateError> {
    if !config.run_migrations {
        tracing::info!("Skipping database migrations");
        return Ok(());
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn connects_and_migrates() {
        let config = DatabaseConfig {
            url: "postgres://localhost/tenant_api_test".to_string(),
            max_connections: 5,
            min_connections: 1,
            run_migrations: true,
        };

        let pool = create_pool(&config).await.unwrap();
        prepare_schema(&pool, &config).await.unwrap();
    }
}
