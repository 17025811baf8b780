pub mod advisory_lock;
pub mod connection;
pub mod notifications;
pub mod postgres;

pub use advisory_lock::{task_lock_key, TaskLockGuard, TaskLockManager, TASK_SCHEDULING_LOCK};
pub use connection::{create_pool, health_check};
pub use notifications::{
    TaskChannelEvent, TaskChannelListener, TaskNotifier, CANCEL_CHANNEL, WAKEUP_CHANNEL,
};
pub use postgres::{
    PostgresCreatedResourceRepository, PostgresRoleStore, PostgresTaskGroupRepository,
    PostgresTaskRepository, PostgresTaskScheduleRepository, PostgresWorkerRepository,
};
