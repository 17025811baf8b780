//! 角色定义与同步抽象
//!
//! 声明式角色在启动时与存储批量对账：前缀下未声明的锁定角色
//! 被删除，已声明的角色描述与权限集被覆盖。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use taskfleet_core::{TaskFleetError, TaskFleetResult};

/// 声明式角色定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleDefinition {
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
}

/// 存储中的角色行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
    /// 锁定角色由声明管理，对账时可被删除或覆盖
    pub locked: bool,
}

/// 一次角色对账的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleSyncReport {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// 所有声明的角色名必须位于公共前缀之下
pub fn validate_role_prefix(prefix: &str, desired: &[RoleDefinition]) -> TaskFleetResult<()> {
    for role in desired {
        if !role.name.starts_with(prefix) {
            return Err(TaskFleetError::InvalidTaskParams(format!(
                "角色 '{}' 不在前缀 '{}' 之下",
                role.name, prefix
            )));
        }
    }
    Ok(())
}

/// 对账计划：声明与存储现状的差集
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSyncPlan {
    /// 前缀下未声明的锁定角色，待删除
    pub obsolete: Vec<String>,
    /// 声明中尚不存在的角色，待创建
    pub create: Vec<RoleDefinition>,
    /// 声明中已存在的角色，描述与权限集待覆盖
    pub update: Vec<RoleDefinition>,
}

/// 求对账计划
///
/// 只有锁定角色会被删除；前缀下手工创建的未锁定角色保持不变。
pub fn plan_role_sync(prefix: &str, desired: &[RoleDefinition], existing: &[Role]) -> RoleSyncPlan {
    let mut plan = RoleSyncPlan::default();

    for role in existing {
        if role.locked
            && role.name.starts_with(prefix)
            && !desired.iter().any(|d| d.name == role.name)
        {
            plan.obsolete.push(role.name.clone());
        }
    }

    for role in desired {
        if existing.iter().any(|e| e.name == role.name) {
            plan.update.push(role.clone());
        } else {
            plan.create.push(role.clone());
        }
    }

    plan
}

/// 角色存储抽象
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// 对账：删除前缀下未声明的锁定角色，upsert所有声明的角色
    async fn sync_roles(
        &self,
        prefix: &str,
        desired: &[RoleDefinition],
    ) -> TaskFleetResult<RoleSyncReport>;

    async fn find_by_name(&self, name: &str) -> TaskFleetResult<Option<Role>>;
}
