use async_trait::async_trait;
use chrono::Duration;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::Worker;
use taskfleet_domain::repositories::WorkerRepository;

/// PostgreSQL Worker注册表实现
pub struct PostgresWorkerRepository {
    pool: PgPool,
}

impl PostgresWorkerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &sqlx::postgres::PgRow) -> TaskFleetResult<Worker> {
        Ok(Worker {
            name: row.try_get("name")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
        })
    }
}

#[async_trait]
impl WorkerRepository for PostgresWorkerRepository {
    async fn heartbeat(&self, name: &str) -> TaskFleetResult<(Worker, bool)> {
        // xmax为0表示该行由本语句插入而非更新
        let row = sqlx::query(
            r#"
            INSERT INTO workers (name, last_heartbeat)
            VALUES ($1, NOW())
            ON CONFLICT (name) DO UPDATE SET last_heartbeat = NOW()
            RETURNING name, last_heartbeat, (xmax = 0) AS created
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        let worker = Self::row_to_worker(&row)?;
        let created: bool = row.try_get("created")?;

        if created {
            info!("发现新Worker: '{}'", name);
        }
        Ok((worker, created))
    }

    async fn find_by_name(&self, name: &str) -> TaskFleetResult<Option<Worker>> {
        let row = sqlx::query("SELECT name, last_heartbeat FROM workers WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_worker(&row)?)),
            None => Ok(None),
        }
    }

    async fn online_workers(&self, ttl: Duration) -> TaskFleetResult<Vec<Worker>> {
        let rows = sqlx::query(
            r#"
            SELECT name, last_heartbeat FROM workers
            WHERE EXTRACT(EPOCH FROM (NOW() - last_heartbeat)) < $1
            ORDER BY last_heartbeat DESC
            "#,
        )
        .bind(ttl.num_seconds())
        .fetch_all(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn missing_workers(&self, ttl: Duration) -> TaskFleetResult<Vec<Worker>> {
        let rows = sqlx::query(
            r#"
            SELECT name, last_heartbeat FROM workers
            WHERE EXTRACT(EPOCH FROM (NOW() - last_heartbeat)) >= $1
            ORDER BY last_heartbeat ASC
            "#,
        )
        .bind(ttl.num_seconds())
        .fetch_all(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn cleanup_missing(&self, age: Duration) -> TaskFleetResult<u64> {
        let result = sqlx::query(
            "DELETE FROM workers WHERE EXTRACT(EPOCH FROM (NOW() - last_heartbeat)) > $1",
        )
        .bind(age.num_seconds())
        .execute(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!("清理 {} 个长期missing的Worker行", deleted);
        }
        Ok(deleted)
    }

    async fn remove(&self, name: &str) -> TaskFleetResult<bool> {
        let result = sqlx::query("DELETE FROM workers WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;

        let removed = result.rows_affected() > 0;
        if removed {
            debug!("注销Worker成功: {}", name);
        }
        Ok(removed)
    }
}
