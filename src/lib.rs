//! IronKeeper - 钱包扩展后台协调层
//!
//! 单一写者状态中心、UI 端状态复制、DApp 会话授权、闲置自动锁定、
//! 保活心跳与持久化快照迁移

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode};

pub mod prelude {
    pub use crate::{
        app_state::{AppState, AppStateDeps},
        domain::{Notification, PortMessage, Snapshot, UiIntent},
        error::{AppError, AppErrorCode},
        service::{
            dapp_registry::DappRegistry, inactivity_lock::InactivityLock,
            replication::ReplicationHub, state_hub::StateHub,
        },
    };
}
