//! 任务执行
//!
//! 领到锁的任务在这里走完剩余生命周期：记名、置running、
//! 运行处理器、写终态、释放锁。带资源预留的任务完结后
//! 发唤醒通知，让等待同键资源的Worker立即重扫。

use std::sync::Arc;

use tracing::{error, info, warn};

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::context::TaskContext;
use taskfleet_domain::entities::{Task, TaskError, TaskState};
use taskfleet_domain::messaging::TaskEventNotifier;
use taskfleet_domain::repositories::{TaskGroupRepository, TaskRepository};

use crate::claim::ClaimedTask;
use crate::registry::TaskRegistry;

/// 把处理器错误折叠为持久化的错误负载
fn error_payload(err: &TaskFleetError) -> TaskError {
    let kind = match err {
        TaskFleetError::HandlerNotFound { .. } => "HandlerNotFound",
        TaskFleetError::InvalidTaskParams(_) => "InvalidTaskParams",
        _ => "TaskExecution",
    };
    TaskError::new(kind, err.to_string(), "")
}

/// 任务执行器
#[derive(Clone)]
pub struct TaskExecutor {
    worker_name: String,
    task_repo: Arc<dyn TaskRepository>,
    group_repo: Arc<dyn TaskGroupRepository>,
    registry: Arc<TaskRegistry>,
    notifier: Arc<dyn TaskEventNotifier>,
}

impl TaskExecutor {
    pub fn new(
        worker_name: String,
        task_repo: Arc<dyn TaskRepository>,
        group_repo: Arc<dyn TaskGroupRepository>,
        registry: Arc<TaskRegistry>,
        notifier: Arc<dyn TaskEventNotifier>,
    ) -> Self {
        Self {
            worker_name,
            task_repo,
            group_repo,
            registry,
            notifier,
        }
    }

    /// 执行已领取的任务直到终态并释放锁
    pub async fn execute(&self, claimed: ClaimedTask) -> TaskFleetResult<()> {
        let ClaimedTask { task, lock } = claimed;
        let had_reservations = !task.reserved_resources.is_empty();

        self.task_repo.assign_worker(task.id, &self.worker_name).await?;
        let task = self.task_repo.set_running(task.id).await?;
        if task.state != TaskState::Running {
            // 领取与置running之间被取消
            warn!("任务在启动前已进入终态，跳过执行: {}", task.entity_description());
            lock.release().await?;
            return Ok(());
        }

        info!("开始执行任务: {}", task.entity_description());
        match self.run_handler(&task).await {
            Ok(()) => {
                let done = self.task_repo.set_completed(task.id).await?;
                info!("任务执行完成: {}", done.entity_description());
            }
            Err(err) => {
                error!("任务执行失败: {} ({})", task.entity_description(), err);
                self.task_repo
                    .set_failed(task.id, &error_payload(&err))
                    .await?;
            }
        }

        lock.release().await?;

        if had_reservations {
            self.notifier.wakeup().await?;
        }
        Ok(())
    }

    async fn run_handler(&self, task: &Task) -> TaskFleetResult<()> {
        let handler = self.registry.get(&task.name)?;

        let group = match task.task_group_id {
            Some(group_id) => self.group_repo.find_by_id(group_id).await?,
            None => None,
        };

        let ctx = TaskContext::new(task.clone(), group);
        handler.run(&ctx).await
    }
}
