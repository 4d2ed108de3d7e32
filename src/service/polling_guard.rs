//! 轮询守卫
//!
//! 纯谓词，不持有状态：网络切换进行中，或者还没有过第一次成功登录时，
//! 后台轮询（余额、网络状态）不应启动或继续。普通的 loading 状态不阻止轮询，
//! UI 需要看到实时进度。

use crate::{
    domain::{NetworkStatus, SessionFlags},
    service::state_hub::StateHub,
};

/// 是否阻止后台轮询
pub fn should_block_polling(flags: &SessionFlags) -> bool {
    flags.network_status == NetworkStatus::Switching || flags.last_login.is_none()
}

/// 从状态中心读取当前会话标记后判断
pub async fn should_block_polling_now(hub: &StateHub) -> bool {
    hub.read(|s| should_block_polling(&s.session_flags)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(status: NetworkStatus, last_login: Option<i64>) -> SessionFlags {
        SessionFlags {
            network_status: status,
            last_login,
            is_locked: false,
        }
    }

    #[test]
    fn test_switching_blocks() {
        assert!(should_block_polling(&flags(
            NetworkStatus::Switching,
            Some(1_690_000_000)
        )));
    }

    #[test]
    fn test_idle_after_login_allows() {
        assert!(!should_block_polling(&flags(
            NetworkStatus::Idle,
            Some(1_690_000_000)
        )));
    }

    #[test]
    fn test_loading_still_allows() {
        assert!(!should_block_polling(&flags(
            NetworkStatus::Loading,
            Some(1_690_000_000)
        )));
    }

    #[test]
    fn test_before_first_login_blocks() {
        assert!(should_block_polling(&flags(NetworkStatus::Idle, None)));
    }
}
