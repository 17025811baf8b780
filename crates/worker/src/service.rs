//! Worker服务
//!
//! 把心跳循环、任务主循环和遗弃任务回收器装配成一个可
//! 启停的服务。主循环空闲时监听唤醒通道，执行中监听取消
//! 通道，关闭时给在途任务一个按心跳周期计的宽限期。

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskfleet_core::config::{TaskingConfig, WorkerConfig};
use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::TaskError;
use taskfleet_domain::hooks::LifecycleHooks;
use taskfleet_domain::locks::LockManager;
use taskfleet_domain::messaging::TaskEventNotifier;
use taskfleet_domain::repositories::{
    CreatedResourceRepository, TaskGroupRepository, TaskRepository, TaskScheduleRepository,
    WorkerRepository,
};
use taskfleet_infrastructure::{
    PostgresCreatedResourceRepository, PostgresTaskGroupRepository, PostgresTaskRepository,
    PostgresTaskScheduleRepository, PostgresWorkerRepository, TaskChannelEvent,
    TaskChannelListener, TaskLockManager, TaskNotifier,
};

use crate::claim::{ClaimedTask, TaskClaimer};
use crate::dispatch::TaskDispatcher;
use crate::executor::TaskExecutor;
use crate::heartbeat::HeartbeatTicker;
use crate::reaper::{TaskReaper, TaskReaperConfig};
use crate::registry::{TaskHandler, TaskRegistry};
use crate::schedule::ScheduleDispatcher;

/// 生成本进程的Worker名称，形如 `<type>-<pid>@<host>`
pub fn generate_worker_name(worker_type: &str) -> String {
    let host = hostname::get()
        .unwrap_or_else(|_| "unknown".into())
        .to_string_lossy()
        .to_string();
    format!("{}-{}@{}", worker_type, std::process::id(), host)
}

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    pool: PgPool,
    worker_config: WorkerConfig,
    tasking_config: TaskingConfig,
    registry: TaskRegistry,
    hooks: LifecycleHooks,
    worker_name: Option<String>,
}

impl WorkerServiceBuilder {
    pub fn new(pool: PgPool, worker_config: WorkerConfig, tasking_config: TaskingConfig) -> Self {
        Self {
            pool,
            worker_config,
            tasking_config,
            registry: TaskRegistry::new(),
            hooks: LifecycleHooks::new(),
            worker_name: None,
        }
    }

    /// 覆盖自动生成的Worker名称
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = Some(name.into());
        self
    }

    pub fn register_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.registry.register(handler);
        self
    }

    pub fn on_task_create<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&taskfleet_domain::entities::Task) -> TaskFleetResult<()> + Send + Sync + 'static,
    {
        self.hooks.on_create(name, hook);
        self
    }

    pub fn on_task_delete<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&taskfleet_domain::entities::Task) -> TaskFleetResult<()> + Send + Sync + 'static,
    {
        self.hooks.on_delete(name, hook);
        self
    }

    pub fn build(self) -> WorkerService {
        let name = self
            .worker_name
            .unwrap_or_else(|| generate_worker_name(&self.worker_config.worker_type));

        let task_repo: Arc<dyn TaskRepository> =
            Arc::new(PostgresTaskRepository::new(self.pool.clone()));
        let worker_repo: Arc<dyn WorkerRepository> =
            Arc::new(PostgresWorkerRepository::new(self.pool.clone()));
        let group_repo: Arc<dyn TaskGroupRepository> =
            Arc::new(PostgresTaskGroupRepository::new(self.pool.clone()));
        let schedule_repo: Arc<dyn TaskScheduleRepository> =
            Arc::new(PostgresTaskScheduleRepository::new(self.pool.clone()));
        let resource_repo: Arc<dyn CreatedResourceRepository> =
            Arc::new(PostgresCreatedResourceRepository::new(self.pool.clone()));
        let lock_manager: Arc<dyn LockManager> =
            Arc::new(TaskLockManager::new(self.pool.clone()));
        let notifier: Arc<dyn TaskEventNotifier> = Arc::new(TaskNotifier::new(self.pool.clone()));

        let dispatcher = TaskDispatcher::new(
            Arc::clone(&task_repo),
            Arc::clone(&group_repo),
            Arc::clone(&resource_repo),
            Arc::new(self.hooks),
            Arc::clone(&notifier),
        );
        let schedule_dispatcher = ScheduleDispatcher::new(
            Arc::clone(&schedule_repo),
            dispatcher.clone(),
            Arc::clone(&lock_manager),
        );
        let claimer = TaskClaimer::new(Arc::clone(&task_repo), Arc::clone(&lock_manager));
        let executor = TaskExecutor::new(
            name.clone(),
            Arc::clone(&task_repo),
            Arc::clone(&group_repo),
            Arc::new(self.registry),
            Arc::clone(&notifier),
        );
        let reaper = Arc::new(TaskReaper::new(
            Arc::clone(&task_repo),
            Arc::clone(&worker_repo),
            Arc::clone(&lock_manager),
            Arc::clone(&notifier),
            TaskReaperConfig {
                scan_interval_seconds: self.tasking_config.reaper_interval_seconds,
                online_ttl_seconds: self.worker_config.online_ttl_seconds,
            },
        ));

        WorkerService {
            name,
            pool: self.pool,
            worker_config: self.worker_config,
            tasking_config: self.tasking_config,
            task_repo,
            worker_repo,
            claimer,
            executor,
            dispatcher,
            schedule_dispatcher,
            reaper,
            shutdown_tx: Arc::new(RwLock::new(None)),
            is_running: Arc::new(RwLock::new(false)),
        }
    }
}

/// Worker服务
#[derive(Clone)]
pub struct WorkerService {
    name: String,
    pool: PgPool,
    worker_config: WorkerConfig,
    tasking_config: TaskingConfig,
    task_repo: Arc<dyn TaskRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    claimer: TaskClaimer,
    executor: TaskExecutor,
    dispatcher: TaskDispatcher,
    schedule_dispatcher: ScheduleDispatcher,
    reaper: Arc<TaskReaper>,
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    is_running: Arc<RwLock<bool>>,
}

impl WorkerService {
    pub fn builder(
        pool: PgPool,
        worker_config: WorkerConfig,
        tasking_config: TaskingConfig,
    ) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(pool, worker_config, tasking_config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 对外暴露派发器，供应用侧派发、取消和删除任务
    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// 启动心跳循环、任务主循环和遗弃任务回收器
    pub async fn start(&self) -> TaskFleetResult<()> {
        {
            let mut running = self.is_running.write().await;
            if *running {
                return Err(TaskFleetError::Internal("Worker服务已在运行".to_string()));
            }
            *running = true;
        }

        info!("启动Worker服务: {}", self.name);

        // 先上报一次心跳，保证注册行在主循环领任务前就存在
        self.worker_repo.heartbeat(&self.name).await?;

        let (shutdown_tx, _) = broadcast::channel(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx.clone());

        self.reaper.start().await;

        let heartbeat = self.clone();
        let heartbeat_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            heartbeat.heartbeat_loop(heartbeat_shutdown).await;
        });

        let main = self.clone();
        let main_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            main.main_loop(main_shutdown).await;
            main.cleanup().await;
        });

        Ok(())
    }

    /// 发出关闭信号并等待主循环退出
    pub async fn stop(&self) -> TaskFleetResult<()> {
        info!("停止Worker服务: {}", self.name);

        if let Some(tx) = self.shutdown_tx.read().await.as_ref() {
            let _ = tx.send(());
        }

        // 等待宽限期加两拍，主循环在此之前应已清理完毕
        let period = self.worker_config.heartbeat_period_seconds();
        let max_attempts = u64::from(self.worker_config.shutdown_grace_beats) + 2;
        for _ in 0..max_attempts {
            if !self.is_running().await {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(period)).await;
        }

        warn!("Worker服务未在预期时间内退出: {}", self.name);
        Ok(())
    }

    async fn heartbeat_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = HeartbeatTicker::new(
            self.name.clone(),
            Arc::clone(&self.worker_repo),
            self.schedule_dispatcher.clone(),
            self.worker_config.clone(),
            self.tasking_config.clone(),
        );
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.worker_config.heartbeat_period_seconds(),
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = ticker.beat().await {
                        error!("心跳上报失败: {}", err);
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("心跳循环收到关闭信号");
                    break;
                }
            }
        }
    }

    async fn main_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut listener = match TaskChannelListener::connect(&self.pool).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("连接任务通知通道失败: {}", err);
                return;
            }
        };
        let idle_wait = Duration::from_secs(self.worker_config.heartbeat_period_seconds());

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            match self.claimer.claim_next().await {
                Ok(Some(claimed)) => {
                    match self
                        .run_claimed(claimed, &mut listener, &mut shutdown_rx)
                        .await
                    {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(err) => error!("任务执行流程出错: {}", err),
                    }
                }
                Ok(None) => {
                    // 没有可领任务，休眠到有人唤醒或超时重扫
                    tokio::select! {
                        event = listener.next_event(idle_wait) => match event {
                            Ok(Some(TaskChannelEvent::Wakeup)) => {
                                debug!("收到唤醒通知，重新扫描任务");
                            }
                            Ok(_) => {}
                            Err(err) => {
                                error!("接收任务通知失败: {}", err);
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        },
                        _ = shutdown_rx.recv() => break,
                    }
                }
                Err(err) => {
                    error!("领取任务失败: {}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// 执行已领取的任务，同时监听取消与关闭
    ///
    /// 返回Ok(true)表示收到关闭信号，主循环应退出。
    async fn run_claimed(
        &self,
        claimed: ClaimedTask,
        listener: &mut TaskChannelListener,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> TaskFleetResult<bool> {
        let task_id = claimed.task.id;
        let exec = self.executor.execute(claimed);
        tokio::pin!(exec);

        loop {
            tokio::select! {
                result = &mut exec => {
                    result?;
                    return Ok(false);
                }
                event = listener.next_event(Duration::from_secs(3600)) => {
                    if let Ok(Some(TaskChannelEvent::Cancel(id))) = event {
                        if id == task_id {
                            // 取消者已写入终态，丢弃执行future即可，
                            // 锁随守卫连接关闭而释放
                            info!("当前任务被取消，中止执行: {}", task_id);
                            return Ok(false);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    self.abort_or_finish(task_id, exec).await?;
                    return Ok(true);
                }
            }
        }
    }

    /// 关闭宽限期内等待在途任务完成，耗尽后落为失败
    async fn abort_or_finish(
        &self,
        task_id: Uuid,
        exec: std::pin::Pin<&mut (impl std::future::Future<Output = TaskFleetResult<()>> + Send)>,
    ) -> TaskFleetResult<()> {
        let grace = Duration::from_secs(
            self.worker_config.heartbeat_period_seconds()
                * u64::from(self.worker_config.shutdown_grace_beats),
        );
        info!("收到关闭信号，等待在途任务最多 {:?}", grace);

        match tokio::time::timeout(grace, exec).await {
            Ok(result) => result,
            Err(_) => {
                warn!("宽限期耗尽，放弃在途任务: {}", task_id);
                // 任务可能恰好在宽限期边界完结，写入被拒时只记日志不阻塞退出
                if let Err(err) = self
                    .task_repo
                    .set_failed(task_id, &TaskError::aborted_during_shutdown())
                    .await
                {
                    error!("放弃在途任务时写入失败状态出错: {}", err);
                }
                Ok(())
            }
        }
    }

    async fn cleanup(&self) {
        self.reaper.stop().await;
        if let Err(err) = self.worker_repo.remove(&self.name).await {
            error!("注销Worker注册行失败: {}", err);
        }
        *self.is_running.write().await = false;
        info!("Worker已退出: {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_worker_name_format() {
        let name = generate_worker_name("content");
        let (prefix, host) = name.split_once('@').unwrap();
        assert!(prefix.starts_with("content-"));
        assert!(!host.is_empty());
        assert_eq!(
            prefix.strip_prefix("content-").unwrap(),
            std::process::id().to_string()
        );
    }
}
