use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务生命周期状态
///
/// 终态一旦写入不可再变更，数据库侧通过条件更新保证。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "skipped")]
    Skipped,
}

impl TaskState {
    /// 终态集合
    pub const FINAL_STATES: [TaskState; 4] = [
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Canceled,
        TaskState::Skipped,
    ];

    pub fn is_final(&self) -> bool {
        Self::FINAL_STATES.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::Skipped => "skipped",
        }
    }

    /// 状态机允许的转换，数据库条件更新是权威实现，此处供内存实现和校验使用
    pub fn transition_allowed(&self, to: TaskState) -> bool {
        match self {
            TaskState::Waiting => !matches!(to, TaskState::Waiting),
            TaskState::Running => matches!(
                to,
                TaskState::Completed | TaskState::Failed | TaskState::Canceled
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskState {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskState {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "waiting" => Ok(TaskState::Waiting),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "canceled" => Ok(TaskState::Canceled),
            "skipped" => Ok(TaskState::Skipped),
            _ => Err(format!("Invalid task state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskState {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 任务失败时的结构化错误负载，持久化为JSONB
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskError {
    pub kind: String,
    pub description: String,
    pub traceback: String,
}

impl TaskError {
    pub fn new(
        kind: impl Into<String>,
        description: impl Into<String>,
        traceback: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            traceback: traceback.into(),
        }
    }

    /// Worker失联时由遗弃任务检测写入的错误负载
    pub fn worker_unavailable(worker_name: &str) -> Self {
        Self {
            kind: "WorkerUnavailable".to_string(),
            description: format!("Worker '{worker_name}' is unavailable"),
            traceback: String::new(),
        }
    }

    /// Worker关闭宽限期耗尽时写入的错误负载
    pub fn aborted_during_shutdown() -> Self {
        Self {
            kind: "Aborted".to_string(),
            description: "Aborted during worker shutdown.".to_string(),
            traceback: String::new(),
        }
    }
}

/// 任务记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub state: TaskState,
    /// 日志关联ID，跨进程追踪同一请求链
    pub logging_cid: String,
    pub args: Option<serde_json::Value>,
    pub kwargs: Option<serde_json::Value>,
    /// 有序的资源预留键列表，创建后不可变，`shared:`前缀表示共享持有
    pub reserved_resources: Vec<String>,
    pub error: Option<TaskError>,
    /// 执行该任务的Worker名称，弱引用
    pub worker: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub task_group_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(name: String, logging_cid: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            state: TaskState::Waiting,
            logging_cid,
            args: None,
            kwargs: None,
            reserved_resources: Vec::new(),
            error: None,
            worker: None,
            parent_task_id: None,
            task_group_id: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    pub fn entity_description(&self) -> String {
        format!("任务 '{}' (ID: {}, 状态: {})", self.name, self.id, self.state)
    }
}

/// Worker注册表条目
///
/// 名称形如 `<type>@<host>`，唯一。在线与否由最近心跳时间推导，
/// 不落库为显式字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub last_heartbeat: DateTime<Utc>,
}

impl Worker {
    pub fn online(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_heartbeat < ttl
    }

    pub fn missing(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        !self.online(now, ttl)
    }
}

/// 任务组，跟踪一批相关任务是否已全部派发
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    pub id: Uuid,
    pub description: String,
    pub all_tasks_dispatched: bool,
}

impl TaskGroup {
    pub fn new(description: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            description,
            all_tasks_dispatched: false,
        }
    }
}

/// 周期性任务计划
///
/// `next_dispatch` 为NULL表示计划停用；`dispatch_interval_seconds`
/// 为NULL表示一次性计划，派发后停用。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSchedule {
    pub id: Uuid,
    pub name: String,
    pub task_name: String,
    pub next_dispatch: Option<DateTime<Utc>>,
    pub dispatch_interval_seconds: Option<i64>,
    pub last_task_id: Option<Uuid>,
}

impl TaskSchedule {
    pub fn new(name: String, task_name: String, first_dispatch: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            task_name,
            next_dispatch: Some(first_dispatch),
            dispatch_interval_seconds: None,
            last_task_id: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval_seconds = Some(interval.num_seconds());
        self
    }

    pub fn dispatch_interval(&self) -> Option<Duration> {
        self.dispatch_interval_seconds.map(Duration::seconds)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_dispatch, Some(at) if at <= now)
    }

    /// 计算派发后的下一次触发时间
    ///
    /// 周期计划从上一次计划时间推进并追平已经过去的周期，
    /// 一次性计划返回None表示停用。
    pub fn advance(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = self.dispatch_interval()?;
        let mut next = self.next_dispatch? + interval;
        while next <= now {
            next = next + interval;
        }
        Some(next)
    }
}

/// 任务执行过程中创建的资源记录，随任务级联删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResource {
    pub id: Uuid,
    pub task_id: Uuid,
    pub resource_type: String,
    pub resource_ref: String,
}

impl CreatedResource {
    pub fn new(task_id: Uuid, resource_type: String, resource_ref: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            resource_type,
            resource_ref,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_states_are_terminal() {
        for state in TaskState::FINAL_STATES {
            assert!(state.is_final());
            for to in [
                TaskState::Waiting,
                TaskState::Running,
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Canceled,
                TaskState::Skipped,
            ] {
                assert!(!state.transition_allowed(to), "{state} -> {to} 不应被允许");
            }
        }
    }

    #[test]
    fn test_waiting_transitions() {
        assert!(TaskState::Waiting.transition_allowed(TaskState::Running));
        assert!(TaskState::Waiting.transition_allowed(TaskState::Canceled));
        assert!(TaskState::Waiting.transition_allowed(TaskState::Skipped));
        assert!(!TaskState::Waiting.transition_allowed(TaskState::Waiting));
    }

    #[test]
    fn test_running_transitions() {
        assert!(TaskState::Running.transition_allowed(TaskState::Completed));
        assert!(TaskState::Running.transition_allowed(TaskState::Failed));
        assert!(TaskState::Running.transition_allowed(TaskState::Canceled));
        assert!(!TaskState::Running.transition_allowed(TaskState::Skipped));
        assert!(!TaskState::Running.transition_allowed(TaskState::Waiting));
    }

    #[test]
    fn test_worker_online_window() {
        let now = Utc::now();
        let worker = Worker {
            name: "worker@host1".to_string(),
            last_heartbeat: now - Duration::seconds(20),
        };
        assert!(worker.online(now, Duration::seconds(30)));
        assert!(worker.missing(now, Duration::seconds(15)));
    }

    #[test]
    fn test_schedule_advance_catches_up() {
        let now = Utc::now();
        let schedule = TaskSchedule {
            id: Uuid::new_v4(),
            name: "nightly".to_string(),
            task_name: "fleet.cleanup".to_string(),
            next_dispatch: Some(now - Duration::hours(5)),
            dispatch_interval_seconds: Some(3600),
            last_task_id: None,
        };
        let next = schedule.advance(now).unwrap();
        assert!(next > now);
        assert!(next <= now + Duration::hours(1));
    }

    #[test]
    fn test_one_shot_schedule_deactivates() {
        let now = Utc::now();
        let schedule = TaskSchedule::new(
            "once".to_string(),
            "fleet.migrate".to_string(),
            now - Duration::minutes(1),
        );
        assert!(schedule.is_due(now));
        assert_eq!(schedule.advance(now), None);
    }

    #[test]
    fn test_task_starts_waiting() {
        let task = Task::new("fleet.sync".to_string(), "cid-1".to_string());
        assert_eq!(task.state, TaskState::Waiting);
        assert!(!task.is_final());
        assert!(task.reserved_resources.is_empty());
    }
}
