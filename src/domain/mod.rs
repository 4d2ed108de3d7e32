//! Domain 模块
//!
//! 快照模型与跨上下文消息格式

pub mod messages;
pub mod snapshot;

// 重新导出常用类型
pub use messages::{Notification, PopupId, PortMessage, UiIntent};
pub use snapshot::{
    Account, AccountId, DappConnection, DappState, NetworkStatus, Origin, PriceState,
    SessionFlags, Snapshot, VaultState, WalletSettings, CURRENT_SCHEMA_VERSION,
};
