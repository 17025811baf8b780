//! PostgreSQL咨询锁管理
//!
//! 任务锁使用单参数bigint形式，键由任务UUID折叠得到；
//! 全局临界区使用双参数(int, int)形式。锁是会话级的：
//! 守卫持有一条从连接池分离出来的专用连接，连接断开时
//! 服务端自动释放锁，持锁进程崩溃即等价于解锁。

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::locks::{HeldLock, LockManager};

/// 计划派发全局临界区的锁键，双参数形式的组号固定为0
pub const TASK_SCHEDULING_LOCK: i32 = 42;

/// 把任务UUID折叠为63位非负锁键
///
/// 高64位与低64位异或后清除符号位。不同UUID可能折叠到同一键，
/// 碰撞只会让不相关的任务被串行化，不破坏互斥安全。
pub fn task_lock_key(id: Uuid) -> i64 {
    let bits = id.as_u128();
    (((bits >> 64) ^ bits) & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

#[derive(Debug, Clone, Copy)]
enum AdvisoryKey {
    Task(i64),
    Grouped { group: i32, key: i32 },
}

impl AdvisoryKey {
    fn display_key(&self) -> i64 {
        match self {
            AdvisoryKey::Task(key) => *key,
            AdvisoryKey::Grouped { key, .. } => *key as i64,
        }
    }
}

/// 咨询锁管理器
pub struct TaskLockManager {
    pool: PgPool,
}

impl TaskLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 尝试获取任务锁，锁被占用时返回`LockUnavailable`
    pub async fn try_lock_task(&self, task_id: Uuid) -> TaskFleetResult<TaskLockGuard> {
        let key = task_lock_key(task_id);
        let mut conn = self.detach_connection().await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut conn)
            .await
            .map_err(TaskFleetError::Database)?;

        if !locked {
            return Err(TaskFleetError::LockUnavailable { key });
        }

        debug!("获取任务咨询锁: key={} (任务: {})", key, task_id);
        Ok(TaskLockGuard {
            conn: Some(conn),
            key: AdvisoryKey::Task(key),
        })
    }

    /// 尝试获取双参数形式的组锁，用于全局单例临界区
    pub async fn try_lock_group(&self, group: i32, key: i32) -> TaskFleetResult<TaskLockGuard> {
        let mut conn = self.detach_connection().await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1, $2)")
            .bind(group)
            .bind(key)
            .fetch_one(&mut conn)
            .await
            .map_err(TaskFleetError::Database)?;

        if !locked {
            return Err(TaskFleetError::LockUnavailable { key: key as i64 });
        }

        debug!("获取组咨询锁: group={} key={}", group, key);
        Ok(TaskLockGuard {
            conn: Some(conn),
            key: AdvisoryKey::Grouped { group, key },
        })
    }

    /// 从连接池分离一条专用连接，其生命周期与锁绑定
    async fn detach_connection(&self) -> TaskFleetResult<PgConnection> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(TaskFleetError::Database)?
            .detach();
        Ok(conn)
    }
}

/// 持有中的咨询锁
///
/// 不调用`release`而直接drop时，连接关闭，服务端随会话
/// 结束释放锁。正常路径应显式`release`以便立刻让出。
pub struct TaskLockGuard {
    conn: Option<PgConnection>,
    key: AdvisoryKey,
}

impl TaskLockGuard {
    /// 显式释放锁并关闭专用连接
    ///
    /// 服务端返回false说明会话并未持有该锁，属于逻辑错误，
    /// 以`LockNotHeld`上报。
    pub async fn release(mut self) -> TaskFleetResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let released: bool = match self.key {
            AdvisoryKey::Task(key) => sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
                .bind(key)
                .fetch_one(&mut conn)
                .await
                .map_err(TaskFleetError::Database)?,
            AdvisoryKey::Grouped { group, key } => {
                sqlx::query_scalar("SELECT pg_advisory_unlock($1, $2)")
                    .bind(group)
                    .bind(key)
                    .fetch_one(&mut conn)
                    .await
                    .map_err(TaskFleetError::Database)?
            }
        };

        let _ = conn.close().await;

        if !released {
            return Err(TaskFleetError::LockNotHeld {
                key: self.key.display_key(),
            });
        }

        debug!("释放咨询锁: key={}", self.key.display_key());
        Ok(())
    }
}

#[async_trait]
impl HeldLock for TaskLockGuard {
    async fn release(self: Box<Self>) -> TaskFleetResult<()> {
        (*self).release().await
    }
}

#[async_trait]
impl LockManager for TaskLockManager {
    async fn try_lock_task(&self, task_id: Uuid) -> TaskFleetResult<Box<dyn HeldLock>> {
        let guard = TaskLockManager::try_lock_task(self, task_id).await?;
        Ok(Box::new(guard))
    }

    async fn try_lock_group(&self, group: i32, key: i32) -> TaskFleetResult<Box<dyn HeldLock>> {
        let guard = TaskLockManager::try_lock_group(self, group, key).await?;
        Ok(Box::new(guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_known_values() {
        let id = Uuid::nil();
        assert_eq!(task_lock_key(id), 0);

        let id = Uuid::from_u128(1);
        assert_eq!(task_lock_key(id), 1);

        // 高64位与低64位相同则异或为0
        let id = Uuid::from_u128((7u128 << 64) | 7u128);
        assert_eq!(task_lock_key(id), 0);
    }

    #[test]
    fn test_lock_key_is_non_negative() {
        let id = Uuid::from_u128(u128::MAX);
        assert!(task_lock_key(id) >= 0);

        let id = Uuid::from_u128(1u128 << 63);
        assert!(task_lock_key(id) >= 0);
    }

    #[test]
    fn test_lock_key_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(task_lock_key(id), task_lock_key(id));
    }

    #[test]
    fn test_distinct_uuids_can_collide() {
        // 折叠后只剩63位，构造一对异或结果相同的UUID
        let a = Uuid::from_u128((0xAAu128 << 64) | 0x55u128);
        let b = Uuid::from_u128((0x55u128 << 64) | 0xAAu128);
        assert_ne!(a, b);
        assert_eq!(task_lock_key(a), task_lock_key(b));
    }
}
