use thiserror::Error;
use uuid::Uuid;

/// 任务协调系统错误类型定义
#[derive(Debug, Error)]
pub enum TaskFleetError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("Worker未找到: {name}")]
    WorkerNotFound { name: String },

    #[error("任务组未找到: {id}")]
    TaskGroupNotFound { id: Uuid },

    #[error("任务计划未找到: {name}")]
    TaskScheduleNotFound { name: String },

    #[error("咨询锁被占用: key={key}")]
    LockUnavailable { key: i64 },

    #[error("试图释放未持有的咨询锁: key={key}")]
    LockNotHeld { key: i64 },

    #[error("任务状态转换被拒绝: {id} ({reason})")]
    InvalidTransition { id: Uuid, reason: String },

    #[error("任务处理器未注册: {name}")]
    HandlerNotFound { name: String },

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TaskFleetError {
    fn from(err: serde_json::Error) -> Self {
        TaskFleetError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type TaskFleetResult<T> = std::result::Result<T, TaskFleetError>;
