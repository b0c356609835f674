//! Database and Redis pool construction

use crate::config::DatabaseSettings;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create the PostgreSQL connection pool
pub async fn create_pool(settings: &DatabaseSettings) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.connection_timeout)
        .connect(&settings.url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Run embedded migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("database migration failed")?;
    Ok(())
}

/// Create a Redis connection pool. Used for both the cache engine and the
/// task-queue backend; they may point at the same instance.
pub fn create_redis_pool(url: &str, max_size: usize) -> Result<deadpool_redis::Pool> {
    let mut config = deadpool_redis::Config::from_url(url);
    config.pool = Some(deadpool_redis::PoolConfig::new(max_size));
    let pool = config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .context("failed to create Redis pool")?;
    Ok(pool)
}

/// Probe database connectivity
pub async fn db_health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Probe Redis connectivity
pub async fn redis_health_check(pool: &deadpool_redis::Pool) -> Result<()> {
    let mut conn = pool.get().await?;
    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await?;
    Ok(())
}
