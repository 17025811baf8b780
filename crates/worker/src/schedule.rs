//! 任务计划派发
//!
//! 到期计划的派发在全局临界区内进行，同一时刻只有一个Worker
//! 在派发，保证每个计划每周期恰好触发一次。临界区被占用时
//! 本轮直接跳过，下一次心跳再试。

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::TaskSchedule;
use taskfleet_domain::locks::LockManager;
use taskfleet_domain::repositories::TaskScheduleRepository;
use taskfleet_infrastructure::TASK_SCHEDULING_LOCK;

use crate::dispatch::{DispatchRequest, TaskDispatcher};

/// 计划派发临界区的组号，双参数咨询锁的第一个参数
pub const SCHEDULE_LOCK_GROUP: i32 = 0;

/// 计划派发器
#[derive(Clone)]
pub struct ScheduleDispatcher {
    schedule_repo: Arc<dyn TaskScheduleRepository>,
    dispatcher: TaskDispatcher,
    lock_manager: Arc<dyn LockManager>,
}

impl ScheduleDispatcher {
    pub fn new(
        schedule_repo: Arc<dyn TaskScheduleRepository>,
        dispatcher: TaskDispatcher,
        lock_manager: Arc<dyn LockManager>,
    ) -> Self {
        Self {
            schedule_repo,
            dispatcher,
            lock_manager,
        }
    }

    /// 派发所有到期计划，返回派发数
    pub async fn dispatch_due(&self) -> TaskFleetResult<usize> {
        let lock = match self
            .lock_manager
            .try_lock_group(SCHEDULE_LOCK_GROUP, TASK_SCHEDULING_LOCK)
            .await
        {
            Ok(lock) => lock,
            Err(TaskFleetError::LockUnavailable { .. }) => {
                debug!("计划派发临界区已被其他Worker持有，本轮跳过");
                return Ok(0);
            }
            Err(err) => return Err(err),
        };

        let result = self.dispatch_due_locked().await;
        lock.release().await?;
        result
    }

    async fn dispatch_due_locked(&self) -> TaskFleetResult<usize> {
        let now = Utc::now();
        let mut dispatched = 0;

        for schedule in self.schedule_repo.find_due(now).await? {
            match self.dispatch_one(&schedule).await {
                Ok(()) => dispatched += 1,
                Err(err) => {
                    // 单个计划出错不中断其余计划
                    error!("派发计划 '{}' 失败: {}", schedule.name, err);
                }
            }
        }

        if dispatched > 0 {
            info!("本轮共派发 {} 个到期计划", dispatched);
        }
        Ok(dispatched)
    }

    async fn dispatch_one(&self, schedule: &TaskSchedule) -> TaskFleetResult<()> {
        let now = Utc::now();
        let task = self
            .dispatcher
            .dispatch(DispatchRequest::new(schedule.task_name.clone()))
            .await?;

        let next = schedule.advance(now);
        self.schedule_repo
            .record_dispatch(schedule.id, task.id, next)
            .await?;

        match next {
            Some(at) => info!("计划 '{}' 已派发，下次触发: {}", schedule.name, at),
            None => info!("一次性计划 '{}' 已派发并停用", schedule.name),
        }
        Ok(())
    }
}
