//! 互斥锁抽象
//!
//! 任务锁与全局临界区锁的抽象接口，具体由PostgreSQL
//! 咨询锁实现。锁与会话绑定，持有方崩溃即视为释放。

use async_trait::async_trait;
use uuid::Uuid;

use taskfleet_core::TaskFleetResult;

/// 持有中的锁
///
/// 不调用`release`而直接drop等价于持有方异常退出，
/// 实现侧必须保证锁随之失效。
#[async_trait]
pub trait HeldLock: Send {
    /// 显式释放锁，释放未持有的锁是逻辑错误
    async fn release(self: Box<Self>) -> TaskFleetResult<()>;
}

/// 锁管理器抽象
#[async_trait]
pub trait LockManager: Send + Sync {
    /// 尝试获取任务锁，锁被占用时返回`LockUnavailable`
    async fn try_lock_task(&self, task_id: Uuid) -> TaskFleetResult<Box<dyn HeldLock>>;

    /// 尝试获取带组号的全局临界区锁
    async fn try_lock_group(&self, group: i32, key: i32) -> TaskFleetResult<Box<dyn HeldLock>>;
}
