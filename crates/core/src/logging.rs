use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{TaskFleetError, TaskFleetResult};

/// 初始化日志系统
///
/// `RUST_LOG` 优先于命令行指定的级别。
pub fn init_logging(log_level: &str, log_format: &str) -> TaskFleetResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .map_err(|e| {
                    TaskFleetError::Configuration(format!("初始化JSON日志格式失败: {e}"))
                })?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .map_err(|e| {
                    TaskFleetError::Configuration(format!("初始化Pretty日志格式失败: {e}"))
                })?;
        }
        _ => {
            return Err(TaskFleetError::Configuration(format!(
                "不支持的日志格式: {log_format}"
            )));
        }
    }

    Ok(())
}
