use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::TaskGroup;
use taskfleet_domain::repositories::TaskGroupRepository;

/// PostgreSQL任务组仓储实现
pub struct PostgresTaskGroupRepository {
    pool: PgPool,
}

impl PostgresTaskGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_group(row: &sqlx::postgres::PgRow) -> TaskFleetResult<TaskGroup> {
        Ok(TaskGroup {
            id: row.try_get("id")?,
            description: row.try_get("description")?,
            all_tasks_dispatched: row.try_get("all_tasks_dispatched")?,
        })
    }
}

#[async_trait]
impl TaskGroupRepository for PostgresTaskGroupRepository {
    async fn create(&self, group: &TaskGroup) -> TaskFleetResult<TaskGroup> {
        let row = sqlx::query(
            r#"
            INSERT INTO task_groups (id, description, all_tasks_dispatched)
            VALUES ($1, $2, $3)
            RETURNING id, description, all_tasks_dispatched
            "#,
        )
        .bind(group.id)
        .bind(&group.description)
        .bind(group.all_tasks_dispatched)
        .fetch_one(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        debug!("创建任务组成功: {}", group.id);
        Self::row_to_group(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> TaskFleetResult<Option<TaskGroup>> {
        let row = sqlx::query(
            "SELECT id, description, all_tasks_dispatched FROM task_groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_group(&row)?)),
            None => Ok(None),
        }
    }

    async fn finish(&self, id: Uuid) -> TaskFleetResult<TaskGroup> {
        let row = sqlx::query(
            r#"
            UPDATE task_groups SET all_tasks_dispatched = TRUE
            WHERE id = $1
            RETURNING id, description, all_tasks_dispatched
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        match row {
            Some(row) => {
                debug!("任务组全部任务已派发: {}", id);
                Self::row_to_group(&row)
            }
            None => Err(TaskFleetError::TaskGroupNotFound { id }),
        }
    }
}
