use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::{Task, TaskError};
use taskfleet_domain::repositories::TaskRepository;

const TASK_COLUMNS: &str = "id, name, state, logging_cid, args, kwargs, reserved_resources, \
     error, worker_name, parent_task_id, task_group_id, started_at, finished_at, created_at";

/// PostgreSQL任务仓储实现
///
/// 状态转换全部通过条件更新完成，`rows_affected`为0表示
/// 另一个写入方赢得了竞争。
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 将数据库行转换为Task模型
    fn row_to_task(row: &sqlx::postgres::PgRow) -> TaskFleetResult<Task> {
        let error: Option<serde_json::Value> = row.try_get("error")?;
        let error: Option<TaskError> = match error {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };

        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            state: row.try_get("state")?,
            logging_cid: row.try_get("logging_cid")?,
            args: row.try_get("args")?,
            kwargs: row.try_get("kwargs")?,
            reserved_resources: row
                .try_get::<Vec<String>, _>("reserved_resources")
                .unwrap_or_default(),
            error,
            worker: row.try_get("worker_name")?,
            parent_task_id: row.try_get("parent_task_id")?,
            task_group_id: row.try_get("task_group_id")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn fetch_required(&self, id: Uuid) -> TaskFleetResult<Task> {
        self.find_by_id(id)
            .await?
            .ok_or(TaskFleetError::TaskNotFound { id })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create(&self, task: &Task) -> TaskFleetResult<Task> {
        let error_json = match &task.error {
            Some(error) => Some(serde_json::to_value(error)?),
            None => None,
        };

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (id, name, state, logging_cid, args, kwargs, reserved_resources,
                               error, worker_name, parent_task_id, task_group_id,
                               started_at, finished_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task.id)
        .bind(&task.name)
        .bind(task.state)
        .bind(&task.logging_cid)
        .bind(&task.args)
        .bind(&task.kwargs)
        .bind(&task.reserved_resources)
        .bind(error_json)
        .bind(&task.worker)
        .bind(task.parent_task_id)
        .bind(task.task_group_id)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(task.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        debug!("创建任务成功: {} ({})", task.name, task.id);
        Self::row_to_task(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> TaskFleetResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_incomplete(&self) -> TaskFleetResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE state IN ('waiting', 'running') ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_running_on_worker(&self, worker_name: &str) -> TaskFleetResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE state = 'running' AND worker_name = $1 ORDER BY created_at ASC"
        ))
        .bind(worker_name)
        .fetch_all(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn assign_worker(&self, id: Uuid, worker_name: &str) -> TaskFleetResult<()> {
        let result = sqlx::query("UPDATE tasks SET worker_name = $2 WHERE id = $1")
            .bind(id)
            .bind(worker_name)
            .execute(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;

        if result.rows_affected() == 0 {
            return Err(TaskFleetError::TaskNotFound { id });
        }

        debug!("任务 {} 记到Worker {} 名下", id, worker_name);
        Ok(())
    }

    async fn set_running(&self, id: Uuid) -> TaskFleetResult<Task> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'running', started_at = NOW() \
             WHERE id = $1 AND state = 'waiting'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        if result.rows_affected() == 0 {
            let current = self.fetch_required(id).await?;
            warn!(
                "任务 {} 进入running被拒绝，当前状态: {}",
                id, current.state
            );
            return Ok(current);
        }

        debug!("任务进入running: {}", id);
        self.fetch_required(id).await
    }

    async fn set_completed(&self, id: Uuid) -> TaskFleetResult<Task> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'completed', finished_at = NOW() \
             WHERE id = $1 AND state NOT IN ('completed', 'failed', 'canceled', 'skipped')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        if result.rows_affected() == 0 {
            let current = self.fetch_required(id).await?;
            warn!(
                "任务 {} 标记completed被拒绝，当前状态: {}",
                id, current.state
            );
            return Ok(current);
        }

        debug!("任务完成: {}", id);
        self.fetch_required(id).await
    }

    async fn set_failed(&self, id: Uuid, error: &TaskError) -> TaskFleetResult<Task> {
        let error_json = serde_json::to_value(error)?;

        let result = sqlx::query(
            "UPDATE tasks SET state = 'failed', finished_at = NOW(), error = $2 \
             WHERE id = $1 AND state NOT IN ('completed', 'failed', 'canceled', 'skipped')",
        )
        .bind(id)
        .bind(error_json)
        .execute(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        if result.rows_affected() == 0 {
            let current = self.fetch_required(id).await?;
            return Err(TaskFleetError::InvalidTransition {
                id,
                reason: format!("任务已处于终态 {}，无法标记为failed", current.state),
            });
        }

        debug!("任务失败落库: {} ({})", id, error.description);
        self.fetch_required(id).await
    }

    async fn set_canceled(&self, id: Uuid) -> TaskFleetResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'canceled', finished_at = NOW() \
             WHERE id = $1 AND state IN ('waiting', 'running')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        let canceled = result.rows_affected() > 0;
        if canceled {
            debug!("任务取消: {}", id);
        }
        Ok(canceled)
    }

    async fn delete(&self, id: Uuid) -> TaskFleetResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
