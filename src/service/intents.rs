//! UI 意图分发
//!
//! UI 端不能直接写状态，只能发意图；后台在这里把意图落到对应的状态机上。

use std::sync::Arc;

use crate::{
    domain::{NetworkStatus, Notification, UiIntent},
    error::IntentError,
    infrastructure::notification_bus::NotificationBus,
    service::{
        dapp_registry::DappRegistry,
        inactivity_lock::{InactivityLock, LockReason},
        state_hub::StateHub,
    },
};

/// 意图分发器
pub struct IntentDispatcher {
    hub: Arc<StateHub>,
    lock: Arc<InactivityLock>,
    dapps: Arc<DappRegistry>,
    bus: NotificationBus,
}

impl IntentDispatcher {
    pub fn new(
        hub: Arc<StateHub>,
        lock: Arc<InactivityLock>,
        dapps: Arc<DappRegistry>,
        bus: NotificationBus,
    ) -> Self {
        Self {
            hub,
            lock,
            dapps,
            bus,
        }
    }

    /// 处理一个意图；返回值表示意图是否产生了效果
    pub async fn dispatch(&self, intent: UiIntent) -> Result<bool, IntentError> {
        match intent {
            UiIntent::Activity { event } => Ok(self.lock.record_activity(&event).await),
            UiIntent::Unlock { password } => Ok(self.lock.unlock(&password).await?),
            UiIntent::Lock => {
                self.lock.lock(LockReason::User).await;
                Ok(true)
            }
            UiIntent::ConfirmConnection { origin } => Ok(self.dapps.confirm(&origin).await),
            UiIntent::PopupClosed { popup_id } => Ok(self.dapps.popup_closed(popup_id).await),
            UiIntent::SwitchNetwork { network } => {
                self.hub
                    .apply(|s| s.session_flags.network_status = NetworkStatus::Switching)
                    .await?;
                tracing::info!(network = %network, "Network switch started");
                Ok(true)
            }
            UiIntent::NetworkSwitched { network } => {
                self.hub
                    .apply(|s| {
                        if let Some(vault) = s.vault.as_mut() {
                            vault.network = network.clone();
                        }
                        s.session_flags.network_status = NetworkStatus::Idle;
                    })
                    .await?;
                self.bus.notify(Notification::NetworkChanged { network });
                Ok(true)
            }
            UiIntent::Logout => {
                self.lock.lock(LockReason::User).await;
                self.bus.notify(Notification::LogoutFullScreen);
                Ok(true)
            }
        }
    }
}
