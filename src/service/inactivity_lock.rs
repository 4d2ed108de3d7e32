//! 闲置自动锁定状态机
//!
//! 状态：`Unlocked(timer)` / `Locked`。
//! - Unlocked --用户输入--> Unlocked（重置 last_activity_at）
//! - Unlocked --超时--> Locked（清除密钥材料，广播 lock_wallet）
//! - Locked --成功解锁--> Unlocked
//!
//! 超时检测由定时检查驱动，不依赖任何 UI 端是否打开。只有白名单里的
//! DOM 输入事件算作活动，程序触发的状态变更不会重置计时。

use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time::interval};

use crate::{
    domain::Notification,
    error::{KeyringError, StorageError},
    infrastructure::{
        notification_bus::NotificationBus,
        storage::{KeyValueStorage, LOCK_TIMER_KEY},
    },
    service::{keyring::Keyring, state_hub::StateHub},
    utils::time_utils::Clock,
};

/// 计为用户活动的 DOM 事件（指针 / 键盘 / 触摸）
pub static ACTIVITY_EVENTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "mousedown",
        "mouseup",
        "click",
        "pointerdown",
        "pointerup",
        "wheel",
        "keydown",
        "keyup",
        "keypress",
        "touchstart",
        "touchmove",
        "touchend",
    ]
    .into_iter()
    .collect()
});

pub fn is_activity_event(event: &str) -> bool {
    ACTIVITY_EVENTS.contains(event)
}

/// 锁定计时器（持久化，跨重启保留）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockTimer {
    pub last_activity_at: i64,
    pub timeout_minutes: Option<u32>,
    pub locked: bool,
}

impl LockTimer {
    /// `now - last_activity_at >= timeout_minutes * 60000`
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.timeout_minutes {
            Some(minutes) if minutes > 0 => {
                now_ms - self.last_activity_at >= i64::from(minutes) * 60_000
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked(LockTimer),
    Locked,
}

/// 锁定原因（仅用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Inactivity,
    User,
}

/// 闲置锁定状态机
pub struct InactivityLock {
    state: Mutex<LockState>,
    enabled: bool,
    default_timeout_minutes: Option<u32>,
    check_period: Duration,
    clock: Arc<dyn Clock>,
    keyring: Arc<dyn Keyring>,
    hub: Arc<StateHub>,
    bus: NotificationBus,
    storage: Arc<dyn KeyValueStorage>,
    scheduler: StdMutex<Option<JoinHandle<()>>>,
}

/// 构造参数
pub struct InactivityLockDeps {
    pub enabled: bool,
    pub default_timeout_minutes: Option<u32>,
    pub check_period: Duration,
    pub clock: Arc<dyn Clock>,
    pub keyring: Arc<dyn Keyring>,
    pub hub: Arc<StateHub>,
    pub bus: NotificationBus,
    pub storage: Arc<dyn KeyValueStorage>,
}

impl InactivityLock {
    /// 从持久化的计时器恢复
    ///
    /// 只有计时器未锁定且密钥环仍处于解锁状态时才恢复为 Unlocked；
    /// 新进程里密钥材料已经不在内存中，通常恢复为 Locked。
    pub async fn restore(deps: InactivityLockDeps) -> Arc<Self> {
        let persisted = match deps.storage.get(LOCK_TIMER_KEY).await {
            Ok(Some(raw)) => serde_json::from_value::<LockTimer>(raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read lock timer, starting locked");
                None
            }
        };

        let state = match persisted {
            Some(timer) if !timer.locked && !deps.keyring.is_locked().await => {
                LockState::Unlocked(timer)
            }
            _ => LockState::Locked,
        };

        let lock = Arc::new(Self {
            state: Mutex::new(state),
            enabled: deps.enabled,
            default_timeout_minutes: deps.default_timeout_minutes,
            check_period: deps.check_period,
            clock: deps.clock,
            keyring: deps.keyring,
            hub: deps.hub,
            bus: deps.bus,
            storage: deps.storage,
            scheduler: StdMutex::new(None),
        });

        if !lock.is_locked().await {
            lock.start_scheduler();
        }
        lock
    }

    pub async fn state(&self) -> LockState {
        self.state.lock().await.clone()
    }

    pub async fn is_locked(&self) -> bool {
        matches!(*self.state.lock().await, LockState::Locked)
    }

    /// 记录一次 DOM 输入；返回是否重置了计时器
    pub async fn record_activity(&self, event: &str) -> bool {
        if !is_activity_event(event) {
            return false;
        }

        let mut state = self.state.lock().await;
        let LockState::Unlocked(timer) = &mut *state else {
            return false;
        };

        timer.last_activity_at = self.clock.now_ms();
        let snapshot = timer.clone();
        drop(state);

        self.persist_timer(&snapshot).await;
        true
    }

    /// 用密码解锁；密码错误返回 `Ok(false)`
    pub async fn unlock(self: &Arc<Self>, password: &str) -> Result<bool, KeyringError> {
        if !self.keyring.unlock(password).await? {
            tracing::info!("Unlock rejected: wrong password");
            return Ok(false);
        }

        let now = self.clock.now_ms();
        let timeout_minutes = self
            .hub
            .read(|s| s.auto_lock_minutes())
            .await
            .or(self.default_timeout_minutes);
        let timer = LockTimer {
            last_activity_at: now,
            timeout_minutes,
            locked: false,
        };

        *self.state.lock().await = LockState::Unlocked(timer.clone());
        self.persist_timer(&timer).await;

        if let Err(e) = self
            .hub
            .apply(|s| {
                s.session_flags.is_locked = false;
                s.session_flags.last_login = Some(now / 1000);
            })
            .await
        {
            tracing::warn!(error = %e, "Failed to record unlock in snapshot");
        }

        self.start_scheduler();
        tracing::info!(timeout_minutes = ?timeout_minutes, "🔓 Wallet unlocked");
        Ok(true)
    }

    /// 锁定：清除密钥材料、更新快照、广播通知、取消定时检查
    pub async fn lock(&self, reason: LockReason) {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, LockState::Locked) {
                return;
            }
            *state = LockState::Locked;
        }

        if let Err(e) = self.keyring.lock().await {
            tracing::error!(error = %e, "Keyring failed to clear key material");
        }

        self.persist_timer(&LockTimer {
            last_activity_at: self.clock.now_ms(),
            timeout_minutes: None,
            locked: true,
        })
        .await;

        if let Err(e) = self.hub.apply(|s| s.session_flags.is_locked = true).await {
            tracing::warn!(error = %e, "Failed to record lock in snapshot");
        }

        self.bus.notify(Notification::LockWallet);
        tracing::info!(reason = ?reason, "🔒 Wallet locked");

        self.stop_scheduler();
    }

    /// 定时检查；返回本次是否触发了锁定
    ///
    /// 功能关闭或没有设置超时时为 no-op。
    pub async fn check(&self) -> bool {
        if !self.enabled {
            return false;
        }

        let expired = match &*self.state.lock().await {
            LockState::Unlocked(timer) => timer.is_expired(self.clock.now_ms()),
            LockState::Locked => false,
        };

        if expired {
            self.lock(LockReason::Inactivity).await;
        }
        expired
    }

    /// 修改超时设置（写入快照并立即作用于当前计时器）
    pub async fn set_timeout_minutes(&self, minutes: Option<u32>) -> Result<(), StorageError> {
        self.hub
            .apply(|s| {
                if let Some(vault) = s.vault.as_mut() {
                    vault.settings.auto_lock_minutes = minutes;
                }
            })
            .await?;

        let mut state = self.state.lock().await;
        if let LockState::Unlocked(timer) = &mut *state {
            timer.timeout_minutes = minutes.or(self.default_timeout_minutes);
            let snapshot = timer.clone();
            drop(state);
            self.persist_timer(&snapshot).await;
        }
        Ok(())
    }

    /// 启动定时检查（已在运行则忽略）
    fn start_scheduler(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }

        let mut slot = match self.scheduler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.check_period;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            // 第一次 tick 立即完成
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(lock) = weak.upgrade() else { break };
                if lock.check().await {
                    break;
                }
            }
        }));
        tracing::debug!(period_secs = period.as_secs(), "Inactivity check scheduled");
    }

    fn stop_scheduler(&self) {
        let handle = match self.scheduler.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// 进程退出时取消定时检查
    pub fn teardown(&self) {
        self.stop_scheduler();
    }

    pub fn scheduler_running(&self) -> bool {
        match self.scheduler.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|h| !h.is_finished()),
            Err(_) => false,
        }
    }

    async fn persist_timer(&self, timer: &LockTimer) {
        let value = match serde_json::to_value(timer) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode lock timer");
                return;
            }
        };
        if let Err(e) = self.storage.set(LOCK_TIMER_KEY, value).await {
            tracing::warn!(error = %e, "Failed to persist lock timer");
        }
    }
}
