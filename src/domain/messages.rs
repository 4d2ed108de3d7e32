//! 跨上下文消息
//!
//! - 端口消息：`{ "type": "STATE_CHANGE", "data": Snapshot }`
//! - 广播通知：一次性、无人接收也不报错
//! - UI 意图：UI 端只能发意图，不能直接写状态

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::snapshot::{Origin, Snapshot};

/// 弹窗标识
pub type PopupId = uuid::Uuid;

/// 复制通道上推送的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PortMessage {
    #[serde(rename = "STATE_CHANGE")]
    StateChange(Snapshot),
}

/// 广播通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// 钱包已锁定
    LockWallet,
    /// 全屏页面退出登录
    LogoutFullScreen,
    NetworkChanged { network: String },
    PopupOpened { popup_id: PopupId, origin: Origin },
    PopupClosed { popup_id: PopupId },
}

impl Notification {
    /// 线上格式
    pub fn to_message(&self) -> serde_json::Value {
        match self {
            Notification::LockWallet => json!({ "type": "lock_wallet" }),
            Notification::LogoutFullScreen => json!({ "action": "logoutFS" }),
            Notification::NetworkChanged { network } => {
                json!({ "type": "network_changed", "network": network })
            }
            Notification::PopupOpened { popup_id, origin } => {
                json!({ "type": "popup_opened", "popupId": popup_id, "origin": origin })
            }
            Notification::PopupClosed { popup_id } => {
                json!({ "type": "popup_closed", "popupId": popup_id })
            }
        }
    }
}

/// UI 端发来的意图
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiIntent {
    /// DOM 输入事件，`event` 为事件类型名（如 "keydown"）
    Activity { event: String },
    Unlock { password: String },
    Lock,
    ConfirmConnection { origin: Origin },
    PopupClosed {
        #[serde(rename = "popupId")]
        popup_id: PopupId,
    },
    SwitchNetwork { network: String },
    NetworkSwitched { network: String },
    Logout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_message_envelope() {
        let msg = PortMessage::StateChange(Snapshot::default());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "STATE_CHANGE");
        assert_eq!(json["data"]["schemaVersion"], "3.4.3");
    }

    #[test]
    fn test_notification_shapes() {
        assert_eq!(
            Notification::LockWallet.to_message(),
            json!({ "type": "lock_wallet" })
        );
        assert_eq!(
            Notification::LogoutFullScreen.to_message(),
            json!({ "action": "logoutFS" })
        );
    }

    #[test]
    fn test_intent_parsing() {
        let intent: UiIntent =
            serde_json::from_str(r#"{"type":"activity","event":"keydown"}"#).unwrap();
        assert_eq!(
            intent,
            UiIntent::Activity {
                event: "keydown".into()
            }
        );

        let intent: UiIntent = serde_json::from_str(
            r#"{"type":"confirm_connection","origin":"https://app.example"}"#,
        )
        .unwrap();
        assert!(matches!(intent, UiIntent::ConfirmConnection { .. }));

        let intent: UiIntent = serde_json::from_str(r#"{"type":"lock"}"#).unwrap();
        assert_eq!(intent, UiIntent::Lock);
    }
}
