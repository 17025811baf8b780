//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则。
//! 状态转换方法的语义由实现侧的条件更新保证。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::entities::{CreatedResource, Task, TaskError, TaskGroup, TaskSchedule, Worker};
use taskfleet_core::TaskFleetResult;

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> TaskFleetResult<Task>;
    async fn find_by_id(&self, id: Uuid) -> TaskFleetResult<Option<Task>>;
    /// 按创建时间升序返回所有未进入终态的任务
    async fn find_incomplete(&self) -> TaskFleetResult<Vec<Task>>;
    /// 返回指定Worker上处于running状态的任务
    async fn find_running_on_worker(&self, worker_name: &str) -> TaskFleetResult<Vec<Task>>;
    /// 把任务记到Worker名下，不改变状态
    async fn assign_worker(&self, id: Uuid, worker_name: &str) -> TaskFleetResult<()>;
    /// waiting → running，竞争失败时WARN并返回当前行
    async fn set_running(&self, id: Uuid) -> TaskFleetResult<Task>;
    /// 非终态 → completed，竞争失败时WARN并返回当前行
    async fn set_completed(&self, id: Uuid) -> TaskFleetResult<Task>;
    /// 非终态 → failed，竞争失败是致命错误
    async fn set_failed(&self, id: Uuid, error: &TaskError) -> TaskFleetResult<Task>;
    /// waiting|running → canceled，返回是否由本次调用完成转换
    async fn set_canceled(&self, id: Uuid) -> TaskFleetResult<bool>;
    async fn delete(&self, id: Uuid) -> TaskFleetResult<bool>;
}

/// Worker注册表抽象
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    /// 单语句upsert心跳，返回行和是否为新建
    async fn heartbeat(&self, name: &str) -> TaskFleetResult<(Worker, bool)>;
    async fn find_by_name(&self, name: &str) -> TaskFleetResult<Option<Worker>>;
    async fn online_workers(&self, ttl: Duration) -> TaskFleetResult<Vec<Worker>>;
    async fn missing_workers(&self, ttl: Duration) -> TaskFleetResult<Vec<Worker>>;
    /// 删除超过保留期的missing Worker行，返回删除数
    async fn cleanup_missing(&self, age: Duration) -> TaskFleetResult<u64>;
    /// 优雅关闭时删除自己的注册行
    async fn remove(&self, name: &str) -> TaskFleetResult<bool>;
}

/// 任务组仓储抽象
#[async_trait]
pub trait TaskGroupRepository: Send + Sync {
    async fn create(&self, group: &TaskGroup) -> TaskFleetResult<TaskGroup>;
    async fn find_by_id(&self, id: Uuid) -> TaskFleetResult<Option<TaskGroup>>;
    /// 置位all_tasks_dispatched，幂等
    async fn finish(&self, id: Uuid) -> TaskFleetResult<TaskGroup>;
}

/// 任务计划仓储抽象
#[async_trait]
pub trait TaskScheduleRepository: Send + Sync {
    async fn upsert(&self, schedule: &TaskSchedule) -> TaskFleetResult<TaskSchedule>;
    async fn find_by_name(&self, name: &str) -> TaskFleetResult<Option<TaskSchedule>>;
    /// 返回`next_dispatch <= now`的计划
    async fn find_due(&self, now: DateTime<Utc>) -> TaskFleetResult<Vec<TaskSchedule>>;
    /// 记录一次派发：最近任务与推进后的触发时间（None表示停用）
    async fn record_dispatch(
        &self,
        id: Uuid,
        last_task_id: Uuid,
        next_dispatch: Option<DateTime<Utc>>,
    ) -> TaskFleetResult<()>;
    async fn delete(&self, name: &str) -> TaskFleetResult<bool>;
}

/// 任务产出资源仓储抽象
#[async_trait]
pub trait CreatedResourceRepository: Send + Sync {
    async fn create(&self, resource: &CreatedResource) -> TaskFleetResult<CreatedResource>;
    async fn find_by_task(&self, task_id: Uuid) -> TaskFleetResult<Vec<CreatedResource>>;
}
