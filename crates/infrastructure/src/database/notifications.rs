//! LISTEN/NOTIFY通道
//!
//! 新任务派发后向唤醒通道发通知，取消请求带任务ID发到
//! 取消通道。Worker在休眠时监听两个通道。

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::messaging::TaskEventNotifier;

/// 新任务唤醒通道
pub const WAKEUP_CHANNEL: &str = "taskfleet_wakeup";
/// 任务取消通道，负载为任务UUID
pub const CANCEL_CHANNEL: &str = "taskfleet_cancel";

/// 通知发送端
#[derive(Clone)]
pub struct TaskNotifier {
    pool: PgPool,
}

impl TaskNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskEventNotifier for TaskNotifier {
    /// 通知所有Worker有新任务可领取
    async fn wakeup(&self) -> TaskFleetResult<()> {
        sqlx::query("SELECT pg_notify($1, '')")
            .bind(WAKEUP_CHANNEL)
            .execute(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;
        Ok(())
    }

    /// 广播任务取消请求
    async fn cancel(&self, task_id: Uuid) -> TaskFleetResult<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CANCEL_CHANNEL)
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(TaskFleetError::Database)?;
        Ok(())
    }
}

/// 从通道收到的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskChannelEvent {
    Wakeup,
    Cancel(Uuid),
}

/// 通知接收端，独占一条监听连接
pub struct TaskChannelListener {
    listener: PgListener,
}

impl TaskChannelListener {
    pub async fn connect(pool: &PgPool) -> TaskFleetResult<Self> {
        let mut listener = PgListener::connect_with(pool)
            .await
            .map_err(TaskFleetError::Database)?;
        listener
            .listen_all([WAKEUP_CHANNEL, CANCEL_CHANNEL])
            .await
            .map_err(TaskFleetError::Database)?;
        Ok(Self { listener })
    }

    /// 等待下一条通知，超时返回None
    pub async fn next_event(
        &mut self,
        timeout: Duration,
    ) -> TaskFleetResult<Option<TaskChannelEvent>> {
        let notification = match tokio::time::timeout(timeout, self.listener.recv()).await {
            Ok(result) => result.map_err(TaskFleetError::Database)?,
            Err(_) => return Ok(None),
        };

        match notification.channel() {
            CANCEL_CHANNEL => match notification.payload().parse::<Uuid>() {
                Ok(task_id) => Ok(Some(TaskChannelEvent::Cancel(task_id))),
                Err(_) => {
                    warn!("取消通知负载不是有效UUID: {}", notification.payload());
                    Ok(None)
                }
            },
            _ => Ok(Some(TaskChannelEvent::Wakeup)),
        }
    }
}
