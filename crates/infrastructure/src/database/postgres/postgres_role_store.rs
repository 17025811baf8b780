use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::roles::{
    plan_role_sync, validate_role_prefix, Role, RoleDefinition, RoleStore, RoleSyncReport,
};

/// PostgreSQL角色存储实现
///
/// 锁定角色由声明管理：对账时删除前缀下未声明的锁定角色，
/// 其余声明逐个upsert，描述与权限集以声明为准。
pub struct PostgresRoleStore {
    pool: PgPool,
}

impl PostgresRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_role(row: &sqlx::postgres::PgRow) -> TaskFleetResult<Role> {
        Ok(Role {
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            permissions: row
                .try_get::<Vec<String>, _>("permissions")
                .unwrap_or_default(),
            locked: row.try_get("locked")?,
        })
    }
}

#[async_trait]
impl RoleStore for PostgresRoleStore {
    async fn sync_roles(
        &self,
        prefix: &str,
        desired: &[RoleDefinition],
    ) -> TaskFleetResult<RoleSyncReport> {
        validate_role_prefix(prefix, desired)?;

        let rows = sqlx::query(
            "SELECT name, description, permissions, locked FROM roles WHERE name LIKE $1 || '%'",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        let existing: Vec<Role> = rows
            .iter()
            .map(Self::row_to_role)
            .collect::<TaskFleetResult<_>>()?;

        let plan = plan_role_sync(prefix, desired, &existing);

        let mut deleted = 0u64;
        if !plan.obsolete.is_empty() {
            let result = sqlx::query("DELETE FROM roles WHERE name = ANY($1)")
                .bind(&plan.obsolete)
                .execute(&self.pool)
                .await
                .map_err(TaskFleetError::Database)?;
            deleted = result.rows_affected();
        }

        for role in plan.create.iter().chain(plan.update.iter()) {
            sqlx::query(
                r#"
                INSERT INTO roles (name, description, permissions, locked)
                VALUES ($1, $2, $3, TRUE)
                ON CONFLICT (name) DO UPDATE SET
                    description = EXCLUDED.description,
                    permissions = EXCLUDED.permissions,
                    locked = TRUE
                "#,
            )
            .bind(&role.name)
            .bind(&role.description)
            .bind(&role.permissions)
            .execute(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;
        }

        for role in &plan.create {
            debug!("创建锁定角色: {}", role.name);
        }

        let report = RoleSyncReport {
            created: plan.create.len() as u64,
            updated: plan.update.len() as u64,
            deleted,
        };
        info!(
            "角色对账完成: 前缀 '{}'，新建 {}，更新 {}，删除 {}",
            prefix, report.created, report.updated, report.deleted
        );
        Ok(report)
    }

    async fn find_by_name(&self, name: &str) -> TaskFleetResult<Option<Role>> {
        let row = sqlx::query(
            "SELECT name, description, permissions, locked FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(TaskFleetError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_role(&row)?)),
            None => Ok(None),
        }
    }
}
