//! 单一写者状态中心
//!
//! 特权进程内唯一的权威快照。所有状态变更都经过 [`StateHub::apply`]：
//! 在副本上修改、持久化成功后才替换内存副本，再按顺序通知订阅者。
//! 持久化失败时保留原状态，变更视为没有发生。

use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::{domain::Snapshot, error::StorageError, infrastructure::storage::SnapshotStore};

/// 状态变更订阅者
///
/// 在状态锁内同步调用，保证每个订阅者看到的变更顺序与发生顺序一致。
pub trait StateSubscriber: Send + Sync {
    fn on_transition(&self, snapshot: &Snapshot);
}

/// 状态中心
pub struct StateHub {
    state: Mutex<Snapshot>,
    store: SnapshotStore,
    subscribers: RwLock<Vec<Arc<dyn StateSubscriber>>>,
}

impl StateHub {
    pub fn new(store: SnapshotStore, initial: Snapshot) -> Self {
        Self {
            state: Mutex::new(initial),
            store,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// 从存储恢复（迁移之后调用）
    ///
    /// 进程重启后不可能还有打开的弹窗，残留的 `hasOpenPopup` 在这里清除。
    pub async fn bootstrap(store: SnapshotStore) -> Result<Self, StorageError> {
        let mut snapshot = match store.load().await? {
            Some(snapshot) => snapshot,
            None => {
                tracing::info!("No stored snapshot, starting from defaults");
                Snapshot::default()
            }
        };

        let cleared = snapshot.clear_dangling_popups();
        if cleared > 0 {
            tracing::warn!(count = cleared, "Cleared popup flags left over from previous process");
            store.save(&snapshot).await?;
        }

        Ok(Self::new(store, snapshot))
    }

    /// 注册订阅者
    pub fn subscribe(&self, subscriber: Arc<dyn StateSubscriber>) {
        match self.subscribers.write() {
            Ok(mut subs) => subs.push(subscriber),
            Err(poisoned) => poisoned.into_inner().push(subscriber),
        }
    }

    /// 当前快照副本
    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.clone()
    }

    /// 在状态锁内只读访问；期间不会发生状态变更
    pub async fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        let guard = self.state.lock().await;
        f(&guard)
    }

    /// 执行一次状态变更
    ///
    /// 内容没有变化时不持久化也不通知。
    pub async fn apply<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> Result<R, StorageError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next);

        if next == *guard {
            return Ok(out);
        }

        if let Err(e) = self.store.save(&next).await {
            tracing::error!(error = %e, "Failed to persist state transition, keeping previous state");
            return Err(e);
        }

        *guard = next;
        self.notify(&guard);
        Ok(out)
    }

    fn notify(&self, snapshot: &Snapshot) {
        let subscribers = match self.subscribers.read() {
            Ok(subs) => subs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for subscriber in subscribers {
            subscriber.on_transition(snapshot);
        }
    }
}
