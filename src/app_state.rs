use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    config::Config,
    error::StorageError,
    infrastructure::{
        keep_alive::KeepAliveHandle,
        migration::{MigrationReport, MigrationRunner},
        migration_steps,
        notification_bus::NotificationBus,
        popup_host::{BusPopupHost, PopupHost},
        storage::{FileStorage, KeyValueStorage, SnapshotStore},
    },
    service::{
        dapp_registry::DappRegistry,
        inactivity_lock::{InactivityLock, InactivityLockDeps},
        intents::IntentDispatcher,
        keyring::Keyring,
        replication::{self, ReplicationHub},
        state_hub::StateHub,
    },
    utils::time_utils::{Clock, SystemClock},
};

/// 应用状态
/// 后台进程内所有共享组件
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<dyn KeyValueStorage>,
    pub hub: Arc<StateHub>,
    pub replication: Arc<ReplicationHub>,
    pub bus: NotificationBus,
    pub keyring: Arc<dyn Keyring>,
    pub lock: Arc<InactivityLock>,
    pub dapps: Arc<DappRegistry>,
    pub intents: Arc<IntentDispatcher>,
    pub clock: Arc<dyn Clock>,
    /// 启动时的迁移结果
    pub migrations: Arc<MigrationReport>,
    keep_alive: Arc<Mutex<Option<KeepAliveHandle>>>,
}

/// 构造参数（测试中替换存储、密钥环、时钟、弹窗宿主）
pub struct AppStateDeps {
    pub storage: Arc<dyn KeyValueStorage>,
    pub keyring: Arc<dyn Keyring>,
    pub clock: Arc<dyn Clock>,
    pub popups: Option<Arc<dyn PopupHost>>,
}

impl AppState {
    /// 按配置创建：文件存储 + 系统时钟
    pub async fn from_config(config: Arc<Config>, keyring: Arc<dyn Keyring>) -> anyhow::Result<Self> {
        let storage = Arc::new(FileStorage::open(&config.storage.data_dir)?);
        tracing::info!(data_dir = %config.storage.data_dir, "✅ File storage opened");

        let state = Self::new(
            config,
            AppStateDeps {
                storage,
                keyring,
                clock: Arc::new(SystemClock),
                popups: None,
            },
        )
        .await?;
        Ok(state)
    }

    /// 启动顺序：迁移 → 恢复快照 → 复制通道 → 锁定状态机 → DApp 注册表
    pub async fn new(config: Arc<Config>, deps: AppStateDeps) -> Result<Self, StorageError> {
        let AppStateDeps {
            storage,
            keyring,
            clock,
            popups,
        } = deps;

        let runner = MigrationRunner::new(storage.clone(), migration_steps::default_chain());
        let migrations = runner.run().await?;
        if !migrations.failed.is_empty() {
            tracing::warn!(failed = ?migrations.failed, "Some migrations failed, continuing with best-effort data");
        }

        let hub = Arc::new(StateHub::bootstrap(SnapshotStore::new(storage.clone())).await?);
        let replication = replication::install(&hub);
        let bus = NotificationBus::new();

        let lock = InactivityLock::restore(InactivityLockDeps {
            enabled: config.lock.enable_auto_lock,
            default_timeout_minutes: config.lock.default_timeout_minutes,
            check_period: Duration::from_secs(config.lock.check_interval_secs),
            clock: clock.clone(),
            keyring: keyring.clone(),
            hub: hub.clone(),
            bus: bus.clone(),
            storage: storage.clone(),
        })
        .await;

        let popups: Arc<dyn PopupHost> = match popups {
            Some(popups) => popups,
            None => Arc::new(BusPopupHost::new(bus.clone())),
        };
        let dapps = Arc::new(DappRegistry::new(
            hub.clone(),
            popups,
            clock.clone(),
            Duration::from_secs(config.dapp.confirmation_timeout_secs),
        ));

        let intents = Arc::new(IntentDispatcher::new(
            hub.clone(),
            lock.clone(),
            dapps.clone(),
            bus.clone(),
        ));

        tracing::info!(
            applied = migrations.applied.len(),
            locked = lock.is_locked().await,
            "✅ Background state initialized"
        );

        Ok(Self {
            config,
            storage,
            hub,
            replication,
            bus,
            keyring,
            lock,
            dapps,
            intents,
            clock,
            migrations: Arc::new(migrations),
            keep_alive: Arc::new(Mutex::new(None)),
        })
    }

    /// 登记保活任务句柄，供健康检查与退出清理使用
    pub fn set_keep_alive(&self, handle: KeepAliveHandle) {
        match self.keep_alive.lock() {
            Ok(mut slot) => *slot = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
    }

    /// 保活状态；未启用为 `None`
    pub fn keep_alive_running(&self) -> Option<bool> {
        match self.keep_alive.lock() {
            Ok(slot) => slot.as_ref().map(|h| h.is_running()),
            Err(_) => Some(false),
        }
    }

    /// 进程退出：取消定时检查与保活
    pub fn shutdown(&self) {
        self.lock.teardown();
        let handle = match self.keep_alive.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.stop();
        }
        tracing::info!("Background process torn down");
    }
}
