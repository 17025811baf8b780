pub mod postgres_created_resource_repository;
pub mod postgres_role_store;
pub mod postgres_task_group_repository;
pub mod postgres_task_repository;
pub mod postgres_task_schedule_repository;
pub mod postgres_worker_repository;

pub use postgres_created_resource_repository::PostgresCreatedResourceRepository;
pub use postgres_role_store::PostgresRoleStore;
pub use postgres_task_group_repository::PostgresTaskGroupRepository;
pub use postgres_task_repository::PostgresTaskRepository;
pub use postgres_task_schedule_repository::PostgresTaskScheduleRepository;
pub use postgres_worker_repository::PostgresWorkerRepository;
