//! 遗弃任务回收
//!
//! 周期扫描missing Worker名下的running任务。能拿到任务锁
//! 说明持有者确实消失了，落为失败释放资源；拿不到锁说明
//! Worker只是心跳迟到，跳过等下一轮。

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::{Task, TaskError, TaskState, Worker};
use taskfleet_domain::locks::LockManager;
use taskfleet_domain::messaging::TaskEventNotifier;
use taskfleet_domain::repositories::{TaskRepository, WorkerRepository};

/// 回收器配置
#[derive(Debug, Clone)]
pub struct TaskReaperConfig {
    /// 扫描间隔
    pub scan_interval_seconds: u64,
    /// 心跳存活窗口，与Worker侧一致
    pub online_ttl_seconds: u64,
}

impl Default for TaskReaperConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 30,
            online_ttl_seconds: 30,
        }
    }
}

/// 遗弃任务回收器
pub struct TaskReaper {
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    lock_manager: Arc<dyn LockManager>,
    notifier: Arc<dyn TaskEventNotifier>,
    config: TaskReaperConfig,
    running: Arc<RwLock<bool>>,
}

impl TaskReaper {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        lock_manager: Arc<dyn LockManager>,
        notifier: Arc<dyn TaskEventNotifier>,
        config: TaskReaperConfig,
    ) -> Self {
        Self {
            task_repo,
            worker_repo,
            lock_manager,
            notifier,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 启动后台扫描循环
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("遗弃任务回收器已在运行");
                return;
            }
            *running = true;
        }

        info!(
            "启动遗弃任务回收器，扫描间隔: {}秒",
            self.config.scan_interval_seconds
        );
        let reaper = Arc::clone(self);
        tokio::spawn(async move {
            reaper.scan_loop().await;
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("停止遗弃任务回收器");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn scan_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !self.is_running().await {
                break;
            }

            match self.reap_abandoned().await {
                Ok(0) => {}
                Ok(reaped) => info!("本轮回收了 {} 个遗弃任务", reaped),
                Err(err) => error!("遗弃任务扫描失败: {}", err),
            }
        }
    }

    /// 扫描一轮并回收所有可确认的遗弃任务，返回回收数
    pub async fn reap_abandoned(&self) -> TaskFleetResult<usize> {
        let ttl = ChronoDuration::seconds(self.config.online_ttl_seconds as i64);
        let missing = self.worker_repo.missing_workers(ttl).await?;

        let mut reaped = 0;
        let mut freed_resources = false;

        for worker in &missing {
            let (count, freed) = self.reap_worker_tasks(worker).await?;
            reaped += count;
            freed_resources |= freed;
        }

        if freed_resources {
            self.notifier.wakeup().await?;
        }
        Ok(reaped)
    }

    async fn reap_worker_tasks(&self, worker: &Worker) -> TaskFleetResult<(usize, bool)> {
        let tasks = self.task_repo.find_running_on_worker(&worker.name).await?;
        let mut reaped = 0;
        let mut freed_resources = false;

        for task in tasks {
            let lock = match self.lock_manager.try_lock_task(task.id).await {
                Ok(lock) => lock,
                Err(TaskFleetError::LockUnavailable { .. }) => {
                    // 锁还被持有，执行进程尚在
                    debug!("任务 {} 的锁仍被持有，跳过", task.id);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let reap_result = self.reap_locked(&task, &worker.name).await;
            lock.release().await?;

            if reap_result? {
                reaped += 1;
                freed_resources |= !task.reserved_resources.is_empty();
            }
        }

        Ok((reaped, freed_resources))
    }

    async fn reap_locked(&self, task: &Task, worker_name: &str) -> TaskFleetResult<bool> {
        // 锁到手后重读，任务可能已被其他回收者处理
        let Some(current) = self.task_repo.find_by_id(task.id).await? else {
            return Ok(false);
        };
        if current.state != TaskState::Running {
            return Ok(false);
        }

        warn!("回收遗弃任务: {}", current.entity_description());
        self.task_repo
            .set_failed(current.id, &TaskError::worker_unavailable(worker_name))
            .await?;
        Ok(true)
    }
}
