//! 任务领取
//!
//! 按创建时间升序扫描未完结任务，逐个尝试咨询锁。锁到手后
//! 重读行确认状态：running说明原持有者已消失，按遗弃处理；
//! waiting且资源无冲突才真正领取。扫描过程中把领不到的任务
//! 的资源声明累积为已占用集合，保证派发顺序上的公平。

use std::sync::Arc;

use tracing::{debug, warn};

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::{Task, TaskError, TaskState};
use taskfleet_domain::locks::{HeldLock, LockManager};
use taskfleet_domain::repositories::TaskRepository;
use taskfleet_domain::resources::ResourceClaims;

/// 已领取的任务，锁守卫与之同生命周期
pub struct ClaimedTask {
    pub task: Task,
    pub lock: Box<dyn HeldLock>,
}

/// 任务领取器
#[derive(Clone)]
pub struct TaskClaimer {
    task_repo: Arc<dyn TaskRepository>,
    lock_manager: Arc<dyn LockManager>,
}

impl TaskClaimer {
    pub fn new(task_repo: Arc<dyn TaskRepository>, lock_manager: Arc<dyn LockManager>) -> Self {
        Self {
            task_repo,
            lock_manager,
        }
    }

    /// 扫描一轮并领取第一个可执行的任务
    ///
    /// 返回None表示本轮没有可领取的任务。每执行完一个任务后
    /// 调用方应重新扫描，因为资源占用情况已经变化。
    pub async fn claim_next(&self) -> TaskFleetResult<Option<ClaimedTask>> {
        let mut taken = ResourceClaims::default();

        for task in self.task_repo.find_incomplete().await? {
            let claims = ResourceClaims::parse(&task.reserved_resources);

            let lock = match self.lock_manager.try_lock_task(task.id).await {
                Ok(lock) => lock,
                Err(TaskFleetError::LockUnavailable { .. }) => {
                    // 其他Worker正持有该任务
                    taken.extend(&claims);
                    continue;
                }
                Err(err) => return Err(err),
            };

            // 锁到手后重读，行可能已被删除或状态已变
            let Some(current) = self.task_repo.find_by_id(task.id).await? else {
                lock.release().await?;
                continue;
            };

            match current.state {
                TaskState::Running => {
                    // 锁空闲但状态是running：持有者没走完终态就消失了。
                    // 落为失败后资源即被释放，不计入已占用集合。
                    self.fail_abandoned(&current).await?;
                    lock.release().await?;
                }
                TaskState::Waiting => {
                    if claims.conflicts_with(&taken) {
                        lock.release().await?;
                        taken.extend(&claims);
                        continue;
                    }
                    return Ok(Some(ClaimedTask {
                        task: current,
                        lock,
                    }));
                }
                _ => {
                    // 扫描后进入终态，资源已释放
                    lock.release().await?;
                }
            }
        }

        Ok(None)
    }

    async fn fail_abandoned(&self, task: &Task) -> TaskFleetResult<()> {
        warn!("发现遗弃任务: {}", task.entity_description());
        let worker = task.worker.as_deref().unwrap_or("unknown");
        self.task_repo
            .set_failed(task.id, &TaskError::worker_unavailable(worker))
            .await?;
        debug!("遗弃任务已落为失败: {}", task.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockLockManager, MockTaskRepository};

    fn claimer(
        task_repo: &Arc<MockTaskRepository>,
        lock_manager: &Arc<MockLockManager>,
    ) -> TaskClaimer {
        TaskClaimer::new(
            Arc::clone(task_repo) as Arc<dyn TaskRepository>,
            Arc::clone(lock_manager) as Arc<dyn LockManager>,
        )
    }

    fn waiting_task(name: &str, resources: &[&str]) -> Task {
        let mut task = Task::new(name.to_string(), "cid".to_string());
        task.reserved_resources = resources.iter().map(|s| s.to_string()).collect();
        task
    }

    #[tokio::test]
    async fn test_claims_first_waiting_task() {
        let task_repo = Arc::new(MockTaskRepository::new());
        let lock_manager = Arc::new(MockLockManager::new());
        let first = task_repo.insert(waiting_task("fleet.a", &[]));
        task_repo.insert(waiting_task("fleet.b", &[]));

        let claimed = claimer(&task_repo, &lock_manager)
            .claim_next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.task.id, first);
        assert_eq!(lock_manager.held_count(), 1);

        claimed.lock.release().await.unwrap();
        assert_eq!(lock_manager.held_count(), 0);
    }

    #[tokio::test]
    async fn test_resource_conflict_blocks_later_task() {
        let task_repo = Arc::new(MockTaskRepository::new());
        let lock_manager = Arc::new(MockLockManager::new());
        let busy = task_repo.insert(waiting_task("fleet.a", &["repo:a"]));
        task_repo.insert(waiting_task("fleet.b", &["repo:a"]));
        // 第一个任务被其他Worker持有，它的独占声明应阻塞第二个
        lock_manager.hold_task_externally(busy);

        let claimed = claimer(&task_repo, &lock_manager).claim_next().await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_shared_claims_do_not_block() {
        let task_repo = Arc::new(MockTaskRepository::new());
        let lock_manager = Arc::new(MockLockManager::new());
        let busy = task_repo.insert(waiting_task("fleet.a", &["shared:repo:a"]));
        let free = task_repo.insert(waiting_task("fleet.b", &["shared:repo:a"]));
        lock_manager.hold_task_externally(busy);

        let claimed = claimer(&task_repo, &lock_manager)
            .claim_next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.task.id, free);
    }

    #[tokio::test]
    async fn test_abandoned_running_task_is_failed() {
        let task_repo = Arc::new(MockTaskRepository::new());
        let lock_manager = Arc::new(MockLockManager::new());

        let mut task = waiting_task("fleet.a", &["repo:a"]);
        task.state = TaskState::Running;
        task.worker = Some("worker@dead-host".to_string());
        let abandoned = task_repo.insert(task);
        let next = task_repo.insert(waiting_task("fleet.b", &["repo:a"]));

        let claimed = claimer(&task_repo, &lock_manager)
            .claim_next()
            .await
            .unwrap()
            .unwrap();
        // 遗弃任务落败后资源释放，同键任务紧接着被领取
        assert_eq!(claimed.task.id, next);

        let failed = task_repo.get(abandoned).unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(
            failed.error,
            Some(TaskError::worker_unavailable("worker@dead-host"))
        );
    }

    #[tokio::test]
    async fn test_externally_locked_task_is_skipped() {
        let task_repo = Arc::new(MockTaskRepository::new());
        let lock_manager = Arc::new(MockLockManager::new());
        let busy = task_repo.insert(waiting_task("fleet.a", &[]));
        let free = task_repo.insert(waiting_task("fleet.b", &[]));
        lock_manager.hold_task_externally(busy);

        let claimed = claimer(&task_repo, &lock_manager)
            .claim_next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.task.id, free);
    }

    #[tokio::test]
    async fn test_empty_backlog_returns_none() {
        let task_repo = Arc::new(MockTaskRepository::new());
        let lock_manager = Arc::new(MockLockManager::new());
        let claimed = claimer(&task_repo, &lock_manager).claim_next().await.unwrap();
        assert!(claimed.is_none());
    }
}
