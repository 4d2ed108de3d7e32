//! 状态复制通道
//!
//! 每个接入的 UI 端（弹窗、全屏页、注入脚本）一条通道。接入时立即推送完整快照；
//! 之后每次状态变更按内容哈希与该通道上次发送的快照比较，变化了才推送。
//! 对已断开的端推送是 no-op，通道被静默移除。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    domain::{PortMessage, Snapshot},
    error::ChannelDeliveryError,
    service::state_hub::{StateHub, StateSubscriber},
};

/// 单个 UI 端的复制通道（不持久化）
struct ReplicationChannel {
    name: String,
    sender: mpsc::UnboundedSender<PortMessage>,
    last_sent_hash: Option<String>,
}

impl ReplicationChannel {
    /// 推送；内容未变返回 `Ok(false)`
    fn push(&mut self, snapshot: &Snapshot, hash: &str) -> Result<bool, ChannelDeliveryError> {
        if self.last_sent_hash.as_deref() == Some(hash) {
            return Ok(false);
        }

        self.sender
            .send(PortMessage::StateChange(snapshot.clone()))
            .map_err(|_| ChannelDeliveryError {
                port: self.name.clone(),
            })?;
        self.last_sent_hash = Some(hash.to_string());
        Ok(true)
    }
}

/// UI 端持有的端口
pub struct PortHandle {
    pub id: Uuid,
    pub receiver: mpsc::UnboundedReceiver<PortMessage>,
}

/// 复制中心
#[derive(Default)]
pub struct ReplicationHub {
    channels: Mutex<HashMap<Uuid, ReplicationChannel>>,
}

impl ReplicationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接入并立即推送当前快照
    ///
    /// 调用方需保证 `current` 与后续变更之间没有空隙，通常通过 [`Self::attach_to`]。
    pub fn attach(&self, name: impl Into<String>, current: &Snapshot) -> PortHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let mut channel = ReplicationChannel {
            name: name.into(),
            sender,
            last_sent_hash: None,
        };
        // 接收端刚创建，这里不会失败
        let _ = channel.push(current, &current.structural_hash());

        tracing::info!(port = %channel.name, port_id = %id, "UI surface attached");
        self.lock_channels().insert(id, channel);
        PortHandle { id, receiver }
    }

    /// 在状态锁内接入，保证首帧之后的每次变更都会被看到
    pub async fn attach_to(&self, hub: &StateHub, name: impl Into<String>) -> PortHandle {
        let name = name.into();
        hub.read(|snapshot| self.attach(name, snapshot)).await
    }

    pub fn detach(&self, id: Uuid) {
        if let Some(channel) = self.lock_channels().remove(&id) {
            tracing::info!(port = %channel.name, port_id = %id, "UI surface detached");
        }
    }

    /// 当前接入数
    pub fn attached(&self) -> usize {
        self.lock_channels().len()
    }

    /// 向所有接入端推送，返回实际推送数
    pub fn publish(&self, snapshot: &Snapshot) -> usize {
        let hash = snapshot.structural_hash();
        let mut channels = self.lock_channels();
        let mut pushed = 0;
        let mut detached = Vec::new();

        for (id, channel) in channels.iter_mut() {
            match channel.push(snapshot, &hash) {
                Ok(true) => pushed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping push to detached surface");
                    detached.push(*id);
                }
            }
        }

        for id in detached {
            channels.remove(&id);
        }
        pushed
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ReplicationChannel>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl StateSubscriber for ReplicationHub {
    fn on_transition(&self, snapshot: &Snapshot) {
        self.publish(snapshot);
    }
}

/// 创建复制中心并订阅状态中心
pub fn install(hub: &StateHub) -> Arc<ReplicationHub> {
    let replication = Arc::new(ReplicationHub::new());
    hub.subscribe(replication.clone());
    replication
}
