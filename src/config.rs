//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 锁定超时的最小可配置值（分钟）
pub const MIN_LOCK_TIMEOUT_MINUTES: u32 = 1;

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
    #[serde(default)]
    pub dapp: DappConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

/// 持久化存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 每个键一个 JSON 文件
    pub data_dir: String,
}

/// 服务器配置（UI 端口与本地控制接口）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub enable_file_logging: bool,
    pub log_file_path: Option<String>,
}

/// 闲置自动锁定配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// 功能开关；关闭时状态机永远停留在 Unlocked
    pub enable_auto_lock: bool,
    /// 快照里没有设置时使用的超时（分钟）
    pub default_timeout_minutes: Option<u32>,
    /// 定时检查周期，必须小于最小超时
    pub check_interval_secs: u64,
}

/// 保活心跳配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// 设置后心跳会 touch 这个文件，供外部守护进程观察
    pub heartbeat_file: Option<String>,
}

/// DApp 权限确认配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DappConfig {
    pub confirmation_timeout_secs: u64,
}

/// 后台轮询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub interval_secs: u64,
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8765".into()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
            enable_file_logging: env_flag("LOG_FILE_ENABLED", false),
            log_file_path: std::env::var("LOG_FILE_PATH").ok(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enable_auto_lock: env_flag("AUTO_LOCK_ENABLED", true),
            default_timeout_minutes: env_parse("AUTO_LOCK_DEFAULT_MINUTES"),
            check_interval_secs: env_parse("LOCK_CHECK_INTERVAL_SECS").unwrap_or(30),
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: env_flag("KEEP_ALIVE_ENABLED", true),
            interval_ms: env_parse("KEEP_ALIVE_INTERVAL_MS").unwrap_or(1_000),
            heartbeat_file: std::env::var("KEEP_ALIVE_HEARTBEAT_FILE").ok(),
        }
    }
}

impl Default for DappConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: env_parse("DAPP_CONFIRMATION_TIMEOUT_SECS")
                .unwrap_or(120),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: env_parse("POLLING_INTERVAL_SECS").unwrap_or(15),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            lock: LockConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            dapp: DappConfig::default(),
            polling: PollingConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        // 检查周期必须短于最小超时，否则 1 分钟超时会被错过
        let min_timeout_secs = u64::from(MIN_LOCK_TIMEOUT_MINUTES) * 60;
        if self.lock.check_interval_secs == 0 || self.lock.check_interval_secs >= min_timeout_secs
        {
            anyhow::bail!(
                "LOCK_CHECK_INTERVAL_SECS must be between 1 and {}",
                min_timeout_secs - 1
            );
        }

        if let Some(minutes) = self.lock.default_timeout_minutes {
            if minutes < MIN_LOCK_TIMEOUT_MINUTES {
                anyhow::bail!("AUTO_LOCK_DEFAULT_MINUTES must be at least {MIN_LOCK_TIMEOUT_MINUTES}");
            }
        }

        if self.keep_alive.interval_ms == 0 {
            anyhow::bail!("KEEP_ALIVE_INTERVAL_MS must be greater than 0");
        }

        if self.dapp.confirmation_timeout_secs == 0 {
            anyhow::bail!("DAPP_CONFIRMATION_TIMEOUT_SECS must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_config_from_env() {
        let config = Config::from_env().unwrap();
        assert!(config.keep_alive.interval_ms > 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[storage]
data_dir = "/tmp/ironkeeper-test"

[server]
bind_addr = "127.0.0.1:9999"

[logging]
level = "debug"
format = "json"
enable_file_logging = false

[lock]
enable_auto_lock = true
default_timeout_minutes = 5
check_interval_secs = 20

[keep_alive]
enabled = false
interval_ms = 500
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.lock.default_timeout_minutes, Some(5));
        assert_eq!(config.lock.check_interval_secs, 20);
        assert!(!config.keep_alive.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_check_interval_must_be_shorter_than_min_timeout() {
        let mut config = Config::from_env().unwrap();
        config.lock.check_interval_secs = 60;
        assert!(config.validate().is_err());

        config.lock.check_interval_secs = 36;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let mut config = Config::from_env().unwrap();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }
}
