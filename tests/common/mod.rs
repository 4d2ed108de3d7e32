//! 测试辅助模块
//! 内存存储 + 手动时钟组装的后台进程

#![allow(dead_code)]

use std::sync::Arc;

use ironkeeper::{
    app_state::{AppState, AppStateDeps},
    config::Config,
    infrastructure::storage::MemoryStorage,
    service::keyring::InMemoryKeyring,
    utils::time_utils::ManualClock,
};
use serde_json::{json, Value};

pub const PASSWORD: &str = "integration-password";

/// 2023-07-22T04:26:40Z
pub const START_MS: i64 = 1_690_000_000_000;

pub struct TestBackend {
    pub state: Arc<AppState>,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
    pub keyring: Arc<InMemoryKeyring>,
}

/// 测试配置：自动锁定开启，确认超时较短
pub fn test_config() -> Arc<Config> {
    let mut config = Config::from_env().expect("Failed to load config");
    config.lock.enable_auto_lock = true;
    config.lock.default_timeout_minutes = None;
    config.lock.check_interval_secs = 30;
    config.dapp.confirmation_timeout_secs = 5;
    Arc::new(config)
}

/// 在给定存储上启动一个后台进程（模拟进程重启时复用同一存储）
pub async fn start_backend(storage: Arc<MemoryStorage>) -> TestBackend {
    let clock = Arc::new(ManualClock::new(START_MS));
    let keyring = Arc::new(InMemoryKeyring::new(PASSWORD, vec![0x42; 32]));

    let state = AppState::new(
        test_config(),
        AppStateDeps {
            storage: storage.clone(),
            keyring: keyring.clone(),
            clock: clock.clone(),
            popups: None,
        },
    )
    .await
    .expect("Failed to start backend");

    TestBackend {
        state: Arc::new(state),
        storage,
        clock,
        keyring,
    }
}

pub async fn fresh_backend() -> TestBackend {
    start_backend(Arc::new(MemoryStorage::new())).await
}

/// 3.0 时代的持久化快照
pub fn legacy_snapshot() -> Value {
    json!({
        "schemaVersion": "3.0.0",
        "vault": {
            "accounts": ["0xaaa", { "address": "0xbbb", "label": "Savings" }],
            "chain": "sepolia",
            "lockTimeout": 60
        },
        "dapp": {
            "https://app.example": ["0xaaa"]
        },
        "price": { "usd": { "ETH": 3100.5 } }
    })
}
