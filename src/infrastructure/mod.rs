pub mod health;
pub mod keep_alive; // 保活提示
pub mod logging;
pub mod migration;
pub mod migration_steps; // 快照迁移链
pub mod notification_bus;
pub mod popup_host;
pub mod storage;
