//! 广播通知总线
//!
//! 一次性、即发即忘：没有订阅者时发送直接丢弃，不报错。
//! 用于锁定、退出登录、网络切换和弹窗生命周期通知。

use tokio::sync::broadcast;

use crate::domain::Notification;

const BUS_CAPACITY: usize = 64;

/// 通知总线
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// 发布通知，返回收到的订阅者数量
    pub fn notify(&self, notification: Notification) -> usize {
        match self.sender.send(notification) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(dropped)) => {
                tracing::debug!(notification = ?dropped, "No listeners for notification");
                0
            }
        }
    }

    /// 订阅
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_without_listeners_is_silent() {
        let bus = NotificationBus::new();
        assert_eq!(bus.notify(Notification::LockWallet), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe();

        bus.notify(Notification::LockWallet);
        bus.notify(Notification::LogoutFullScreen);

        assert_eq!(rx.recv().await.unwrap(), Notification::LockWallet);
        assert_eq!(rx.recv().await.unwrap(), Notification::LogoutFullScreen);
    }
}
