//! 确认弹窗宿主
//!
//! 平台相关的窗口创建被抽象成 [`PopupHost`]。[`BusPopupHost`] 把弹窗生命周期
//! 发布到通知总线，由接入的全屏页渲染确认界面，关闭事件再以意图形式回到后台。

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    domain::{Notification, Origin, PopupId},
    error::PopupError,
    infrastructure::notification_bus::NotificationBus,
};

/// 弹窗宿主
#[async_trait]
pub trait PopupHost: Send + Sync {
    /// 为某个来源打开确认弹窗
    async fn open_confirmation(&self, origin: &str) -> Result<PopupId, PopupError>;

    /// 关闭弹窗（已关闭时为 no-op）
    async fn close(&self, popup_id: PopupId);
}

/// 通过通知总线驱动的弹窗宿主
pub struct BusPopupHost {
    bus: NotificationBus,
    open: Mutex<HashMap<PopupId, Origin>>,
}

impl BusPopupHost {
    pub fn new(bus: NotificationBus) -> Self {
        Self {
            bus,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// 当前打开的弹窗数量
    pub fn open_count(&self) -> usize {
        self.open.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PopupHost for BusPopupHost {
    async fn open_confirmation(&self, origin: &str) -> Result<PopupId, PopupError> {
        let popup_id = Uuid::new_v4();
        self.open
            .lock()
            .map_err(|_| PopupError::Unavailable)?
            .insert(popup_id, origin.to_string());

        let listeners = self.bus.notify(Notification::PopupOpened {
            popup_id,
            origin: origin.to_string(),
        });
        if listeners == 0 {
            tracing::warn!(origin = %origin, "Confirmation popup opened with no surface to render it");
        }
        Ok(popup_id)
    }

    async fn close(&self, popup_id: PopupId) {
        let removed = self
            .open
            .lock()
            .map(|mut m| m.remove(&popup_id))
            .unwrap_or(None);
        if removed.is_some() {
            self.bus.notify(Notification::PopupClosed { popup_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_and_close_announce_on_bus() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();
        let host = BusPopupHost::new(bus);

        let id = host.open_confirmation("https://app.example").await.unwrap();
        assert_eq!(host.open_count(), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::PopupOpened {
                popup_id: id,
                origin: "https://app.example".into()
            }
        );

        host.close(id).await;
        host.close(id).await;
        assert_eq!(host.open_count(), 0);
        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::PopupClosed { popup_id: id }
        );
        assert!(rx.try_recv().is_err());
    }
}
