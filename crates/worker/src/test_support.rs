//! 测试用内存实现
//!
//! 仓储、锁和通知的内存版，状态机语义与数据库实现保持一致，
//! 供本crate的单元测试注入。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use taskfleet_core::{TaskFleetError, TaskFleetResult};
use taskfleet_domain::entities::{
    CreatedResource, Task, TaskError, TaskGroup, TaskSchedule, TaskState, Worker,
};
use taskfleet_domain::locks::{HeldLock, LockManager};
use taskfleet_domain::messaging::TaskEventNotifier;
use taskfleet_domain::repositories::{
    CreatedResourceRepository, TaskGroupRepository, TaskRepository, TaskScheduleRepository,
    WorkerRepository,
};
use taskfleet_infrastructure::task_lock_key;

#[derive(Default)]
pub(crate) struct MockTaskRepository {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl MockTaskRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, task: Task) -> Uuid {
        let id = task.id;
        self.tasks.lock().unwrap().insert(id, task);
        id
    }

    pub(crate) fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, task: &Task) -> TaskFleetResult<Task> {
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> TaskFleetResult<Option<Task>> {
        Ok(self.get(id))
    }

    async fn find_incomplete(&self) -> TaskFleetResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| !task.is_final())
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    async fn find_running_on_worker(&self, worker_name: &str) -> TaskFleetResult<Vec<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| {
                task.state == TaskState::Running && task.worker.as_deref() == Some(worker_name)
            })
            .cloned()
            .collect())
    }

    async fn assign_worker(&self, id: Uuid, worker_name: &str) -> TaskFleetResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskFleetError::TaskNotFound { id })?;
        task.worker = Some(worker_name.to_string());
        Ok(())
    }

    async fn set_running(&self, id: Uuid) -> TaskFleetResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskFleetError::TaskNotFound { id })?;
        if task.state == TaskState::Waiting {
            task.state = TaskState::Running;
            task.started_at = Some(Utc::now());
        }
        Ok(task.clone())
    }

    async fn set_completed(&self, id: Uuid) -> TaskFleetResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskFleetError::TaskNotFound { id })?;
        if !task.is_final() {
            task.state = TaskState::Completed;
            task.finished_at = Some(Utc::now());
        }
        Ok(task.clone())
    }

    async fn set_failed(&self, id: Uuid, error: &TaskError) -> TaskFleetResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskFleetError::TaskNotFound { id })?;
        if task.is_final() {
            return Err(TaskFleetError::InvalidTransition {
                id,
                reason: format!("{} -> failed", task.state),
            });
        }
        task.state = TaskState::Failed;
        task.error = Some(error.clone());
        task.finished_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn set_canceled(&self, id: Uuid) -> TaskFleetResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(TaskFleetError::TaskNotFound { id })?;
        if task.is_final() {
            return Ok(false);
        }
        task.state = TaskState::Canceled;
        task.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> TaskFleetResult<bool> {
        Ok(self.tasks.lock().unwrap().remove(&id).is_some())
    }
}

#[derive(Default)]
pub(crate) struct MockWorkerRepository {
    workers: Mutex<HashMap<String, Worker>>,
}

impl MockWorkerRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_with_heartbeat(&self, name: &str, last_heartbeat: DateTime<Utc>) {
        self.workers.lock().unwrap().insert(
            name.to_string(),
            Worker {
                name: name.to_string(),
                last_heartbeat,
            },
        );
    }
}

#[async_trait]
impl WorkerRepository for MockWorkerRepository {
    async fn heartbeat(&self, name: &str) -> TaskFleetResult<(Worker, bool)> {
        let mut workers = self.workers.lock().unwrap();
        let created = !workers.contains_key(name);
        let worker = Worker {
            name: name.to_string(),
            last_heartbeat: Utc::now(),
        };
        workers.insert(name.to_string(), worker.clone());
        Ok((worker, created))
    }

    async fn find_by_name(&self, name: &str) -> TaskFleetResult<Option<Worker>> {
        Ok(self.workers.lock().unwrap().get(name).cloned())
    }

    async fn online_workers(&self, ttl: Duration) -> TaskFleetResult<Vec<Worker>> {
        let now = Utc::now();
        Ok(self
            .workers
            .lock()
            .unwrap()
            .values()
            .filter(|worker| worker.online(now, ttl))
            .cloned()
            .collect())
    }

    async fn missing_workers(&self, ttl: Duration) -> TaskFleetResult<Vec<Worker>> {
        let now = Utc::now();
        Ok(self
            .workers
            .lock()
            .unwrap()
            .values()
            .filter(|worker| worker.missing(now, ttl))
            .cloned()
            .collect())
    }

    async fn cleanup_missing(&self, age: Duration) -> TaskFleetResult<u64> {
        let now = Utc::now();
        let mut workers = self.workers.lock().unwrap();
        let before = workers.len();
        workers.retain(|_, worker| !worker.missing(now, age));
        Ok((before - workers.len()) as u64)
    }

    async fn remove(&self, name: &str) -> TaskFleetResult<bool> {
        Ok(self.workers.lock().unwrap().remove(name).is_some())
    }
}

#[derive(Default)]
pub(crate) struct MockTaskGroupRepository {
    groups: Mutex<HashMap<Uuid, TaskGroup>>,
}

impl MockTaskGroupRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskGroupRepository for MockTaskGroupRepository {
    async fn create(&self, group: &TaskGroup) -> TaskFleetResult<TaskGroup> {
        self.groups.lock().unwrap().insert(group.id, group.clone());
        Ok(group.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> TaskFleetResult<Option<TaskGroup>> {
        Ok(self.groups.lock().unwrap().get(&id).cloned())
    }

    async fn finish(&self, id: Uuid) -> TaskFleetResult<TaskGroup> {
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .get_mut(&id)
            .ok_or(TaskFleetError::TaskGroupNotFound { id })?;
        group.all_tasks_dispatched = true;
        Ok(group.clone())
    }
}

#[derive(Default)]
pub(crate) struct MockTaskScheduleRepository {
    schedules: Mutex<HashMap<Uuid, TaskSchedule>>,
}

impl MockTaskScheduleRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, schedule: TaskSchedule) {
        self.schedules
            .lock()
            .unwrap()
            .insert(schedule.id, schedule);
    }
}

#[async_trait]
impl TaskScheduleRepository for MockTaskScheduleRepository {
    async fn upsert(&self, schedule: &TaskSchedule) -> TaskFleetResult<TaskSchedule> {
        let mut schedules = self.schedules.lock().unwrap();
        if let Some(existing) = schedules
            .values_mut()
            .find(|existing| existing.name == schedule.name)
        {
            existing.task_name = schedule.task_name.clone();
            existing.next_dispatch = schedule.next_dispatch;
            existing.dispatch_interval_seconds = schedule.dispatch_interval_seconds;
            return Ok(existing.clone());
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(schedule.clone())
    }

    async fn find_by_name(&self, name: &str) -> TaskFleetResult<Option<TaskSchedule>> {
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .values()
            .find(|schedule| schedule.name == name)
            .cloned())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> TaskFleetResult<Vec<TaskSchedule>> {
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .values()
            .filter(|schedule| schedule.is_due(now))
            .cloned()
            .collect())
    }

    async fn record_dispatch(
        &self,
        id: Uuid,
        last_task_id: Uuid,
        next_dispatch: Option<DateTime<Utc>>,
    ) -> TaskFleetResult<()> {
        let mut schedules = self.schedules.lock().unwrap();
        let schedule = schedules.get_mut(&id).ok_or_else(|| {
            TaskFleetError::DatabaseOperation(format!("任务计划不存在: {id}"))
        })?;
        schedule.last_task_id = Some(last_task_id);
        schedule.next_dispatch = next_dispatch;
        Ok(())
    }

    async fn delete(&self, name: &str) -> TaskFleetResult<bool> {
        let mut schedules = self.schedules.lock().unwrap();
        let id = schedules
            .values()
            .find(|schedule| schedule.name == name)
            .map(|schedule| schedule.id);
        Ok(id.and_then(|id| schedules.remove(&id)).is_some())
    }
}

#[derive(Default)]
pub(crate) struct MockCreatedResourceRepository {
    resources: Mutex<Vec<CreatedResource>>,
}

impl MockCreatedResourceRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreatedResourceRepository for MockCreatedResourceRepository {
    async fn create(&self, resource: &CreatedResource) -> TaskFleetResult<CreatedResource> {
        self.resources.lock().unwrap().push(resource.clone());
        Ok(resource.clone())
    }

    async fn find_by_task(&self, task_id: Uuid) -> TaskFleetResult<Vec<CreatedResource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|resource| resource.task_id == task_id)
            .cloned()
            .collect())
    }
}

/// 内存锁管理器，键空间与咨询锁同构
#[derive(Default)]
pub(crate) struct MockLockManager {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MockLockManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 模拟其他进程持有任务锁
    pub(crate) fn hold_task_externally(&self, task_id: Uuid) {
        self.held.lock().unwrap().insert(format!("task:{task_id}"));
    }

    /// 模拟其他进程持有组锁
    pub(crate) fn hold_group_externally(&self, group: i32, key: i32) {
        self.held.lock().unwrap().insert(format!("group:{group}:{key}"));
    }

    pub(crate) fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    fn acquire(&self, lock_key: String, display_key: i64) -> TaskFleetResult<Box<dyn HeldLock>> {
        let mut held = self.held.lock().unwrap();
        if !held.insert(lock_key.clone()) {
            return Err(TaskFleetError::LockUnavailable { key: display_key });
        }
        Ok(Box::new(MockHeldLock {
            held: Arc::clone(&self.held),
            lock_key: Some(lock_key),
        }))
    }
}

#[async_trait]
impl LockManager for MockLockManager {
    async fn try_lock_task(&self, task_id: Uuid) -> TaskFleetResult<Box<dyn HeldLock>> {
        self.acquire(format!("task:{task_id}"), task_lock_key(task_id))
    }

    async fn try_lock_group(&self, group: i32, key: i32) -> TaskFleetResult<Box<dyn HeldLock>> {
        self.acquire(format!("group:{group}:{key}"), key as i64)
    }
}

pub(crate) struct MockHeldLock {
    held: Arc<Mutex<HashSet<String>>>,
    lock_key: Option<String>,
}

impl Drop for MockHeldLock {
    fn drop(&mut self) {
        // 不显式release而直接drop等价于连接断开，锁随之释放
        if let Some(key) = self.lock_key.take() {
            self.held.lock().unwrap().remove(&key);
        }
    }
}

#[async_trait]
impl HeldLock for MockHeldLock {
    async fn release(mut self: Box<Self>) -> TaskFleetResult<()> {
        if let Some(key) = self.lock_key.take() {
            self.held.lock().unwrap().remove(&key);
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockNotifier {
    wakeups: AtomicUsize,
    cancels: Mutex<Vec<Uuid>>,
}

impl MockNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn wakeup_count(&self) -> usize {
        self.wakeups.load(Ordering::SeqCst)
    }

    pub(crate) fn canceled_tasks(&self) -> Vec<Uuid> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskEventNotifier for MockNotifier {
    async fn wakeup(&self) -> TaskFleetResult<()> {
        self.wakeups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel(&self, task_id: Uuid) -> TaskFleetResult<()> {
        self.cancels.lock().unwrap().push(task_id);
        Ok(())
    }
}
