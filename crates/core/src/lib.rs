//! 任务协调系统核心库
//!
//! 提供统一的错误类型、配置加载和日志初始化。

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{AppConfig, DatabaseConfig, TaskingConfig, WorkerConfig};
pub use errors::{TaskFleetError, TaskFleetResult};
pub use logging::init_logging;
