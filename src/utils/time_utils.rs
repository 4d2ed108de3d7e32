//! 时间工具模块
//! 提供时间处理相关的工具函数和可注入的时钟

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// 获取当前时间戳（秒）
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// 获取当前时间戳（毫秒）
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒时间戳转为 UTC 时间
pub fn from_timestamp_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

/// 格式化持续时间
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// 时钟抽象
///
/// 锁定状态机和 DApp 注册表只通过它读取当前时间，测试里可替换为 [`ManualClock`]。
pub trait Clock: Send + Sync {
    /// 当前时间（毫秒）
    fn now_ms(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        current_timestamp_ms()
    }
}

/// 手动推进的时钟
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// 前进指定毫秒
    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
