use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::CreatedResource;
use taskfleet_domain::repositories::CreatedResourceRepository;

/// PostgreSQL任务产出资源仓储实现
///
/// 行随所属任务级联删除，由外键约束保证。
pub struct PostgresCreatedResourceRepository {
    pool: PgPool,
}

impl PostgresCreatedResourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_resource(row: &sqlx::postgres::PgRow) -> TaskFleetResult<CreatedResource> {
        Ok(CreatedResource {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            resource_type: row.try_get("resource_type")?,
            resource_ref: row.try_get("resource_ref")?,
        })
    }
}

#[async_trait]
impl CreatedResourceRepository for PostgresCreatedResourceRepository {
    async fn create(&self, resource: &CreatedResource) -> TaskFleetResult<CreatedResource> {
        let row = sqlx::query(
            r#"
            INSERT INTO created_resources (id, task_id, resource_type, resource_ref)
            VALUES ($1, $2, $3, $4)
            RETURNING id, task_id, resource_type, resource_ref
            "#,
        )
        .bind(resource.id)
        .bind(resource.task_id)
        .bind(&resource.resource_type)
        .bind(&resource.resource_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        debug!(
            "记录任务产出资源: {} ({})",
            resource.resource_ref, resource.task_id
        );
        Self::row_to_resource(&row)
    }

    async fn find_by_task(&self, task_id: Uuid) -> TaskFleetResult<Vec<CreatedResource>> {
        let rows = sqlx::query(
            "SELECT id, task_id, resource_type, resource_ref \
             FROM created_resources WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        rows.iter().map(Self::row_to_resource).collect()
    }
}
