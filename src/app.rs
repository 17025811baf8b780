use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::info;

use taskfleet_core::AppConfig;
use taskfleet_domain::roles::{validate_role_prefix, RoleDefinition, RoleStore};
use taskfleet_infrastructure::{create_pool, health_check, PostgresRoleStore};
use taskfleet_worker::WorkerService;

/// 内建角色的公共前缀
const ROLE_PREFIX: &str = "fleet.";

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 运行Worker服务
    Worker,
    /// 仅执行数据库迁移与角色对账后退出
    Migrate,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    pool: PgPool,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let pool = create_pool(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        health_check(&pool).await.context("数据库连通性检查失败")?;

        Ok(Self { config, mode, pool })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.bootstrap().await?;

        match self.mode {
            AppMode::Migrate => Ok(()),
            AppMode::Worker => self.run_worker(shutdown_rx).await,
        }
    }

    /// 迁移表结构并对账内建角色
    async fn bootstrap(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("执行数据库迁移失败")?;

        let desired = builtin_roles();
        validate_role_prefix(ROLE_PREFIX, &desired)?;

        let store = PostgresRoleStore::new(self.pool.clone());
        store
            .sync_roles(ROLE_PREFIX, &desired)
            .await
            .context("角色对账失败")?;
        Ok(())
    }

    async fn run_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let service = WorkerService::builder(
            self.pool.clone(),
            self.config.worker.clone(),
            self.config.tasking.clone(),
        )
        .build();

        info!("启动Worker: {}", service.name());
        service.start().await.context("启动Worker服务失败")?;

        let _ = shutdown_rx.recv().await;
        info!("Worker收到关闭信号");

        service.stop().await.context("停止Worker服务失败")?;
        info!("Worker服务已停止");
        Ok(())
    }
}

/// 系统内建的锁定角色声明
fn builtin_roles() -> Vec<RoleDefinition> {
    vec![
        RoleDefinition {
            name: "fleet.task_owner".to_string(),
            description: Some("任务属主，可查看、取消和删除自己的任务".to_string()),
            permissions: vec![
                "fleet.view_task".to_string(),
                "fleet.cancel_task".to_string(),
                "fleet.delete_task".to_string(),
            ],
        },
        RoleDefinition {
            name: "fleet.task_viewer".to_string(),
            description: Some("任务只读访问".to_string()),
            permissions: vec!["fleet.view_task".to_string()],
        },
        RoleDefinition {
            name: "fleet.schedule_admin".to_string(),
            description: Some("任务计划的创建、修改与删除".to_string()),
            permissions: vec![
                "fleet.view_taskschedule".to_string(),
                "fleet.change_taskschedule".to_string(),
                "fleet.delete_taskschedule".to_string(),
            ],
        },
    ]
}
