use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::TaskSchedule;
use taskfleet_domain::repositories::TaskScheduleRepository;

const SCHEDULE_COLUMNS: &str =
    "id, name, task_name, next_dispatch, dispatch_interval_seconds, last_task_id";

/// PostgreSQL任务计划仓储实现
pub struct PostgresTaskScheduleRepository {
    pool: PgPool,
}

impl PostgresTaskScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &sqlx::postgres::PgRow) -> TaskFleetResult<TaskSchedule> {
        Ok(TaskSchedule {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            task_name: row.try_get("task_name")?,
            next_dispatch: row.try_get("next_dispatch")?,
            dispatch_interval_seconds: row.try_get("dispatch_interval_seconds")?,
            last_task_id: row.try_get("last_task_id")?,
        })
    }
}

#[async_trait]
impl TaskScheduleRepository for PostgresTaskScheduleRepository {
    async fn upsert(&self, schedule: &TaskSchedule) -> TaskFleetResult<TaskSchedule> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO task_schedules (id, name, task_name, next_dispatch,
                                        dispatch_interval_seconds, last_task_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO UPDATE SET
                task_name = EXCLUDED.task_name,
                next_dispatch = EXCLUDED.next_dispatch,
                dispatch_interval_seconds = EXCLUDED.dispatch_interval_seconds
            RETURNING {SCHEDULE_COLUMNS}
            "#
        ))
        .bind(schedule.id)
        .bind(&schedule.name)
        .bind(&schedule.task_name)
        .bind(schedule.next_dispatch)
        .bind(schedule.dispatch_interval_seconds)
        .bind(schedule.last_task_id)
        .fetch_one(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        debug!("写入任务计划: {}", schedule.name);
        Self::row_to_schedule(&row)
    }

    async fn find_by_name(&self, name: &str) -> TaskFleetResult<Option<TaskSchedule>> {
        let row = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM task_schedules WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_schedule(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_due(&self, now: DateTime<Utc>) -> TaskFleetResult<Vec<TaskSchedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM task_schedules \
             WHERE next_dispatch IS NOT NULL AND next_dispatch <= $1 \
             ORDER BY next_dispatch ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        rows.iter().map(Self::row_to_schedule).collect()
    }

    async fn record_dispatch(
        &self,
        id: Uuid,
        last_task_id: Uuid,
        next_dispatch: Option<DateTime<Utc>>,
    ) -> TaskFleetResult<()> {
        let result = sqlx::query(
            "UPDATE task_schedules SET last_task_id = $2, next_dispatch = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(last_task_id)
        .bind(next_dispatch)
        .execute(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(TaskFleetError::DatabaseOperation(format!(
                "任务计划不存在: {id}"
            )));
        }

        debug!("记录计划派发: {} -> 任务 {}", id, last_task_id);
        Ok(())
    }

    async fn delete(&self, name: &str) -> TaskFleetResult<bool> {
        let result = sqlx::query("DELETE FROM task_schedules WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
