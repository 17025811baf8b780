//! 任务事件通知抽象
//!
//! 派发与取消通过广播通知在线Worker，具体由PostgreSQL
//! LISTEN/NOTIFY实现。通知只是提示，错过通知的Worker
//! 会在下一个心跳周期醒来自行扫描。

use async_trait::async_trait;
use uuid::Uuid;

use taskfleet_core::TaskFleetResult;

/// 通知发送端抽象
#[async_trait]
pub trait TaskEventNotifier: Send + Sync {
    /// 通知所有Worker有新任务或有资源被释放
    async fn wakeup(&self) -> TaskFleetResult<()>;

    /// 广播任务取消请求
    async fn cancel(&self, task_id: Uuid) -> TaskFleetResult<()>;
}
