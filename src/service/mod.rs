pub mod background_poller;
pub mod dapp_registry; // DApp 会话与账户切换确认
pub mod inactivity_lock; // 闲置自动锁定
pub mod intents;
pub mod keyring;
pub mod polling_guard;
pub mod replication; // 状态复制通道
pub mod state_hub;
