//! Worker心跳
//!
//! 每个心跳周期upsert一次注册行。清理missing Worker行和
//! 派发到期计划都搭心跳的车：清理按随机化倒计时触发，
//! 避免所有Worker在同一拍集中清理。

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use rand::Rng;
use tracing::{debug, error, info};

use taskfleet_core::config::{TaskingConfig, WorkerConfig};
use taskfleet_core::TaskFleetResult;
use taskfleet_domain::repositories::WorkerRepository;

use crate::schedule::ScheduleDispatcher;

/// 抽取下一次清理的倒计时拍数
fn jittered_countdown(base: u32) -> u32 {
    if base == 0 {
        return 0;
    }
    rand::rng().random_range(base / 2..=base)
}

/// 心跳执行器，每拍由Worker主循环调用一次
pub struct HeartbeatTicker {
    worker_name: String,
    worker_repo: Arc<dyn WorkerRepository>,
    schedule_dispatcher: ScheduleDispatcher,
    worker_config: WorkerConfig,
    tasking_config: TaskingConfig,
    cleanup_countdown: u32,
    last_beat: Option<Instant>,
}

impl HeartbeatTicker {
    pub fn new(
        worker_name: String,
        worker_repo: Arc<dyn WorkerRepository>,
        schedule_dispatcher: ScheduleDispatcher,
        worker_config: WorkerConfig,
        tasking_config: TaskingConfig,
    ) -> Self {
        let cleanup_countdown = jittered_countdown(worker_config.cleanup_countdown);
        Self {
            worker_name,
            worker_repo,
            schedule_dispatcher,
            worker_config,
            tasking_config,
            cleanup_countdown,
            last_beat: None,
        }
    }

    /// 跳一拍：上报心跳，顺带清理与计划派发
    pub async fn beat(&mut self) -> TaskFleetResult<()> {
        self.record_heartbeat().await?;
        self.maybe_cleanup_missing().await;
        self.maybe_dispatch_schedules().await;
        Ok(())
    }

    async fn record_heartbeat(&mut self) -> TaskFleetResult<()> {
        let (_, created) = self.worker_repo.heartbeat(&self.worker_name).await?;

        if created {
            info!("Worker '{}' 已注册", self.worker_name);
        } else if let Some(last) = self.last_beat {
            // 上一拍距今超过存活窗口，说明本Worker一度被视为missing
            if last.elapsed().as_secs() >= self.worker_config.online_ttl_seconds {
                info!("Worker '{}' 恢复在线", self.worker_name);
            }
        }
        self.last_beat = Some(Instant::now());
        Ok(())
    }

    async fn maybe_cleanup_missing(&mut self) {
        if self.cleanup_countdown > 0 {
            self.cleanup_countdown -= 1;
            return;
        }
        self.cleanup_countdown = jittered_countdown(self.worker_config.cleanup_countdown);

        let age = Duration::days(self.tasking_config.missing_worker_age_days);
        match self.worker_repo.cleanup_missing(age).await {
            Ok(0) => {}
            Ok(removed) => info!("清理了 {} 个长期missing的Worker行", removed),
            Err(err) => error!("清理missing Worker失败: {}", err),
        }
    }

    async fn maybe_dispatch_schedules(&self) {
        if !self.tasking_config.dispatch_schedules {
            return;
        }
        match self.schedule_dispatcher.dispatch_due().await {
            Ok(0) => debug!("没有到期的任务计划"),
            Ok(_) => {}
            Err(err) => error!("派发到期计划失败: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TaskDispatcher;
    use crate::test_support::{
        MockCreatedResourceRepository, MockLockManager, MockNotifier, MockTaskGroupRepository,
        MockTaskRepository, MockTaskScheduleRepository, MockWorkerRepository,
    };
    use chrono::Utc;
    use taskfleet_domain::hooks::LifecycleHooks;
    use taskfleet_domain::locks::LockManager;
    use taskfleet_domain::messaging::TaskEventNotifier;
    use taskfleet_domain::repositories::{
        CreatedResourceRepository, TaskGroupRepository, TaskRepository, TaskScheduleRepository,
    };

    fn ticker(
        worker_repo: &Arc<MockWorkerRepository>,
        worker_config: WorkerConfig,
        tasking_config: TaskingConfig,
    ) -> HeartbeatTicker {
        let task_dispatcher = TaskDispatcher::new(
            Arc::new(MockTaskRepository::new()) as Arc<dyn TaskRepository>,
            Arc::new(MockTaskGroupRepository::new()) as Arc<dyn TaskGroupRepository>,
            Arc::new(MockCreatedResourceRepository::new()) as Arc<dyn CreatedResourceRepository>,
            Arc::new(LifecycleHooks::new()),
            Arc::new(MockNotifier::new()) as Arc<dyn TaskEventNotifier>,
        );
        let schedule_dispatcher = ScheduleDispatcher::new(
            Arc::new(MockTaskScheduleRepository::new()) as Arc<dyn TaskScheduleRepository>,
            task_dispatcher,
            Arc::new(MockLockManager::new()) as Arc<dyn LockManager>,
        );
        HeartbeatTicker::new(
            "content-1@host1".to_string(),
            Arc::clone(worker_repo) as Arc<dyn WorkerRepository>,
            schedule_dispatcher,
            worker_config,
            tasking_config,
        )
    }

    fn worker_config(cleanup_countdown: u32) -> WorkerConfig {
        WorkerConfig {
            worker_type: "content".to_string(),
            online_ttl_seconds: 30,
            shutdown_grace_beats: 3,
            cleanup_countdown,
        }
    }

    fn tasking_config() -> TaskingConfig {
        TaskingConfig {
            reaper_interval_seconds: 30,
            missing_worker_age_days: 7,
            dispatch_schedules: false,
        }
    }

    #[tokio::test]
    async fn test_beat_registers_worker() {
        let worker_repo = Arc::new(MockWorkerRepository::new());
        let mut ticker = ticker(&worker_repo, worker_config(100), tasking_config());

        ticker.beat().await.unwrap();
        let worker = worker_repo
            .find_by_name("content-1@host1")
            .await
            .unwrap()
            .unwrap();
        assert!(worker.online(Utc::now(), Duration::seconds(30)));
    }

    #[tokio::test]
    async fn test_zero_countdown_cleans_aged_rows() {
        let worker_repo = Arc::new(MockWorkerRepository::new());
        worker_repo.insert_with_heartbeat("stale@gone-host", Utc::now() - Duration::days(30));
        worker_repo.insert_with_heartbeat("fresh@host2", Utc::now());

        // cleanup_countdown为0时每拍都清理
        let mut ticker = ticker(&worker_repo, worker_config(0), tasking_config());
        ticker.beat().await.unwrap();

        assert!(worker_repo
            .find_by_name("stale@gone-host")
            .await
            .unwrap()
            .is_none());
        assert!(worker_repo
            .find_by_name("fresh@host2")
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_jittered_countdown_range() {
        for _ in 0..50 {
            let value = jittered_countdown(100);
            assert!((50..=100).contains(&value));
        }
        assert_eq!(jittered_countdown(0), 0);
    }
}
