//! 任务协调系统领域层
//!
//! 实体、状态机、资源预留判定、仓储抽象与执行上下文。
//! 不包含任何存储实现，具体实现位于infrastructure层。

pub mod context;
pub mod entities;
pub mod hooks;
pub mod locks;
pub mod messaging;
pub mod repositories;
pub mod resources;
pub mod roles;

pub use context::TaskContext;
pub use entities::{CreatedResource, Task, TaskError, TaskGroup, TaskSchedule, TaskState, Worker};
pub use hooks::LifecycleHooks;
pub use locks::{HeldLock, LockManager};
pub use messaging::TaskEventNotifier;
pub use repositories::{
    CreatedResourceRepository, TaskGroupRepository, TaskRepository, TaskScheduleRepository,
    WorkerRepository,
};
pub use resources::{ResourceClaims, SHARED_PREFIX};
pub use roles::{plan_role_sync, Role, RoleDefinition, RoleStore, RoleSyncPlan, RoleSyncReport};
