//! 日志系统配置模块
//! 支持结构化日志、日志级别配置和按天轮转的文件日志

use std::path::Path;

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::LoggingConfig;

/// 初始化日志系统
///
/// 开启文件日志时返回后台写线程的 guard，调用方必须持有到进程退出，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ironkeeper={},tower_http=info", config.level)));

    if config.enable_file_logging {
        let log_dir = config
            .log_file_path
            .as_ref()
            .and_then(|p| Path::new(p).parent())
            .unwrap_or_else(|| Path::new("./logs"));

        std::fs::create_dir_all(log_dir)?;

        let file_appender = rolling::daily(log_dir, "ironkeeper.log");
        let (writer, guard) = non_blocking(file_appender);

        if config.format == "json" {
            Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_timer(ChronoUtc::rfc_3339()),
                )
                .with(fmt::layer().json().with_timer(ChronoUtc::rfc_3339()))
                .try_init()?;
        } else {
            Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(false),
                )
                .with(
                    fmt::layer()
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(true),
                )
                .try_init()?;
        }

        return Ok(Some(guard));
    }

    if config.format == "json" {
        Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_timer(ChronoUtc::rfc_3339()))
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(true),
            )
            .try_init()?;
    }

    Ok(None)
}

/// 简化初始化（使用默认配置）
pub fn init_default_logging() -> Option<WorkerGuard> {
    let config = LoggingConfig::default();
    init_logging(&config).unwrap_or_else(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        let _ = tracing_subscriber::fmt().try_init();
        None
    })
}
