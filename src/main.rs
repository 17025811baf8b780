use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use taskfleet_core::{init_logging, AppConfig};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskfleet")
        .version("1.0.0")
        .about("基于Postgres的分布式任务协调系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["worker", "migrate"])
                .default_value("worker"),
        )
        .arg(
            Arg::new("worker-type")
                .long("worker-type")
                .value_name("TYPE")
                .help("Worker类型，覆盖配置文件中的worker.worker_type"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mode_str = matches.get_one::<String>("mode").unwrap();
    let worker_type = matches.get_one::<String>("worker-type");
    let log_level = matches.get_one::<String>("log-level").unwrap();
    let log_format = matches.get_one::<String>("log-format").unwrap();

    init_logging(log_level, log_format)?;

    info!("启动任务协调系统");
    info!("运行模式: {mode_str}");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let mut config = AppConfig::load(config_path.map(String::as_str)).context("加载配置失败")?;

    if let Some(worker_type) = worker_type {
        config.worker.worker_type = worker_type.clone();
        config.validate()?;
    }

    let mode = match mode_str.as_str() {
        "migrate" => AppMode::Migrate,
        _ => AppMode::Worker,
    };

    let app = Application::new(config, mode.clone()).await?;
    let shutdown_manager = ShutdownManager::new();

    if let AppMode::Migrate = mode {
        app.run(shutdown_manager.subscribe().await).await?;
        info!("数据库迁移与角色对账完成");
        return Ok(());
    }

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(result) => {
            if let Err(e) = result {
                error!("应用关闭时发生错误: {e}");
            } else {
                info!("应用已优雅关闭");
            }
        }
        Err(_) => {
            warn!("应用关闭超时，强制退出");
        }
    }

    info!("任务协调系统已退出");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
