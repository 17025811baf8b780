//! 任务协调系统Worker层
//!
//! 任务处理器注册、派发、领取、执行、心跳、计划派发与
//! 遗弃任务回收，由`WorkerService`装配为可启停的服务。

pub mod claim;
pub mod dispatch;
pub mod executor;
pub mod heartbeat;
pub mod reaper;
pub mod registry;
pub mod schedule;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use claim::{ClaimedTask, TaskClaimer};
pub use dispatch::{DispatchRequest, TaskDispatcher};
pub use executor::TaskExecutor;
pub use heartbeat::HeartbeatTicker;
pub use reaper::{TaskReaper, TaskReaperConfig};
pub use registry::{TaskHandler, TaskRegistry};
pub use schedule::{ScheduleDispatcher, SCHEDULE_LOCK_GROUP};
pub use service::{generate_worker_name, WorkerService, WorkerServiceBuilder};
