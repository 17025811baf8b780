use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub tasking: TaskingConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

/// Worker运行时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker名称前缀，完整名称为 `<type>@<host>`
    pub worker_type: String,
    /// 心跳存活窗口，超过该时间未心跳的Worker视为missing
    pub online_ttl_seconds: u64,
    /// 关闭时等待在途任务完成的心跳周期数
    pub shutdown_grace_beats: u32,
    /// 清理长期missing Worker行的倒计时基数（按心跳周期计）
    pub cleanup_countdown: u32,
}

/// 任务协调配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskingConfig {
    /// 遗弃任务检测扫描间隔
    pub reaper_interval_seconds: u64,
    /// missing Worker行的保留天数
    pub missing_worker_age_days: i64,
    /// 是否在心跳时分发到期的任务计划
    pub dispatch_schedules: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/taskfleet".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
            },
            worker: WorkerConfig {
                worker_type: "worker".to_string(),
                online_ttl_seconds: 30,
                shutdown_grace_beats: 3,
                cleanup_countdown: 100,
            },
            tasking: TaskingConfig {
                reaper_interval_seconds: 30,
                missing_worker_age_days: 7,
                dispatch_schedules: true,
            },
        }
    }
}

impl WorkerConfig {
    /// 心跳周期为存活窗口的三分之一
    pub fn heartbeat_period_seconds(&self) -> u64 {
        (self.online_ttl_seconds / 3).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_type.is_empty() {
            return Err(anyhow::anyhow!("Worker类型不能为空"));
        }

        if self.worker_type.contains('@') {
            return Err(anyhow::anyhow!("Worker类型不能包含'@'字符"));
        }

        if self.online_ttl_seconds < 3 {
            return Err(anyhow::anyhow!("心跳存活窗口不能小于3秒"));
        }

        Ok(())
    }
}

impl TaskingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reaper_interval_seconds == 0 {
            return Err(anyhow::anyhow!("遗弃任务扫描间隔必须大于0"));
        }

        if self.missing_worker_age_days <= 0 {
            return Err(anyhow::anyhow!("missing Worker保留天数必须大于0"));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("数据库URL不能为空"));
        }

        if !self.url.starts_with("postgresql://") && !self.url.starts_with("postgres://") {
            return Err(anyhow::anyhow!("数据库URL必须是PostgreSQL格式"));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 默认配置
    /// 2. 配置文件 (TOML格式)
    /// 3. 环境变量覆盖 (前缀: TASKFLEET_)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/taskfleet.toml",
                "taskfleet.toml",
                "/etc/taskfleet/config.toml",
            ];

            let mut config_file_found = false;
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    config_file_found = true;
                    break;
                }
            }

            if !config_file_found {
                builder = builder
                    .set_default("database.url", "postgresql://localhost/taskfleet")?
                    .set_default("database.max_connections", 10)?
                    .set_default("database.min_connections", 1)?
                    .set_default("database.connection_timeout_seconds", 30)?
                    .set_default("database.idle_timeout_seconds", 600)?
                    .set_default("worker.worker_type", "worker")?
                    .set_default("worker.online_ttl_seconds", 30)?
                    .set_default("worker.shutdown_grace_beats", 3)?
                    .set_default("worker.cleanup_countdown", 100)?
                    .set_default("tasking.reaper_interval_seconds", 30)?
                    .set_default("tasking.missing_worker_age_days", 7)?
                    .set_default("tasking.dispatch_schedules", true)?;
            }
        }

        // 环境变量覆盖，优先级最高
        builder = builder.add_source(
            Environment::with_prefix("TASKFLEET")
                .separator("_")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化配置为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 校验配置有效性
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.tasking.validate().context("任务协调配置验证失败")?;

        Ok(())
    }
}
