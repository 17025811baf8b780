use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use taskfleet_core::{DatabaseConfig, TaskFleetError, TaskFleetResult};

/// 按配置创建PostgreSQL连接池
pub async fn create_pool(config: &DatabaseConfig) -> TaskFleetResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        .connect(&config.url)
        .await
        .map_err(TaskFleetError::Database)?;

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> TaskFleetResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(TaskFleetError::Database)?;
    Ok(())
}
