//! DApp 会话注册表
//!
//! 不受信任的页面发起的每个特权操作，都要经过按来源、由用户确认的授权。
//!
//! `request_account_change` 的流程：
//! 1. 来源未连接或已有弹窗打开：直接返回 false，不创建新弹窗
//! 2. 置 `hasOpenPopup` 并登记本次请求的凭据，打开确认弹窗
//! 3. 确认事件（true）、弹窗关闭（false）与超时（false）竞争，先到者结算，只结算一次
//! 4. 凭据仍属于本次请求时清除 `hasOpenPopup`
//!
//! 待结算请求以 oneshot 发送端存放，结算时从表中取出；后到的一方找不到条目，
//! 自然失效，不会二次结算，也不会留下持有旧闭包的监听。
//! 凭据随断开连接作废，旧请求收尾时不会改动重新连接后的新请求。
//! 弹窗可能在其标识登记前就被关闭，这类关闭先记下，登记时立即结算。

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    domain::{AccountId, DappConnection, Origin, PopupId},
    error::StorageError,
    infrastructure::popup_host::PopupHost,
    service::state_hub::StateHub,
    utils::time_utils::{from_timestamp_ms, Clock},
};

/// 单次请求的凭据
type Ticket = Uuid;

struct PendingRequest {
    ticket: Ticket,
    popup_id: Option<PopupId>,
    resolver: oneshot::Sender<bool>,
}

#[derive(Default)]
struct PendingTable {
    requests: HashMap<Origin, PendingRequest>,
    /// 持有 `hasOpenPopup` 的请求，从置位到清除
    claims: HashMap<Origin, Ticket>,
    /// 登记前就被关闭的弹窗
    early_closes: HashSet<PopupId>,
}

impl PendingTable {
    fn settle(&mut self, origin: &str, approved: bool) -> Option<Option<PopupId>> {
        let pending = self.requests.remove(origin)?;
        if self.requests.is_empty() {
            self.early_closes.clear();
        }
        // 请求方可能已放弃接收
        let _ = pending.resolver.send(approved);
        Some(pending.popup_id)
    }

    /// 只结算指定凭据的请求
    fn settle_ticket(&mut self, origin: &str, ticket: Ticket, approved: bool) -> Option<Option<PopupId>> {
        if self.requests.get(origin).map(|p| p.ticket) != Some(ticket) {
            return None;
        }
        self.settle(origin, approved)
    }

    /// 交还凭据；凭据已作废或已被替换时返回 false
    fn release(&mut self, origin: &str, ticket: Ticket) -> bool {
        if self.claims.get(origin) != Some(&ticket) {
            return false;
        }
        self.claims.remove(origin);
        true
    }

    fn origin_of(&self, popup_id: PopupId) -> Option<Origin> {
        self.requests
            .iter()
            .find(|(_, p)| p.popup_id == Some(popup_id))
            .map(|(origin, _)| origin.clone())
    }
}

/// DApp 会话注册表
pub struct DappRegistry {
    hub: Arc<StateHub>,
    popups: Arc<dyn PopupHost>,
    clock: Arc<dyn Clock>,
    confirmation_timeout: Duration,
    pending: Mutex<PendingTable>,
}

impl DappRegistry {
    pub fn new(
        hub: Arc<StateHub>,
        popups: Arc<dyn PopupHost>,
        clock: Arc<dyn Clock>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            hub,
            popups,
            clock,
            confirmation_timeout,
            pending: Mutex::new(PendingTable::default()),
        }
    }

    pub async fn is_connected(&self, origin: &str) -> bool {
        self.hub
            .read(|s| s.dapp.connections.contains_key(origin))
            .await
    }

    pub async fn permitted_accounts(&self, origin: &str) -> Option<BTreeSet<AccountId>> {
        self.hub
            .read(|s| {
                s.dapp
                    .connections
                    .get(origin)
                    .map(|c| c.permitted_accounts.clone())
            })
            .await
    }

    /// 连接（已连接时只更新授权账户）
    pub async fn connect(
        &self,
        origin: &str,
        accounts: impl IntoIterator<Item = AccountId>,
    ) -> Result<(), StorageError> {
        let accounts: BTreeSet<AccountId> = accounts.into_iter().collect();
        let connected_at = from_timestamp_ms(self.clock.now_ms());

        self.hub
            .apply(|s| {
                s.dapp
                    .connections
                    .entry(origin.to_string())
                    .and_modify(|c| c.permitted_accounts = accounts.clone())
                    .or_insert_with(|| DappConnection::new(accounts.clone(), connected_at));
            })
            .await?;

        tracing::info!(origin = %origin, "DApp connected");
        Ok(())
    }

    /// 更新授权账户；来源未连接时返回 false
    pub async fn set_permitted_accounts(
        &self,
        origin: &str,
        accounts: impl IntoIterator<Item = AccountId>,
    ) -> Result<bool, StorageError> {
        let accounts: BTreeSet<AccountId> = accounts.into_iter().collect();
        self.hub
            .apply(|s| match s.dapp.connections.get_mut(origin) {
                Some(conn) => {
                    conn.permitted_accounts = accounts;
                    true
                }
                None => false,
            })
            .await
    }

    /// 断开连接；凭据随连接作废，若有待确认弹窗，走弹窗关闭路径结算为 false
    pub async fn disconnect(&self, origin: &str) -> Result<bool, StorageError> {
        let mut revoked = None;
        let result = self
            .hub
            .apply(|s| {
                revoked = self.lock_pending().claims.remove(origin);
                s.dapp.connections.remove(origin).is_some()
            })
            .await;
        let removed = match result {
            Ok(removed) => removed,
            Err(e) => {
                // 状态没变，凭据原样归还
                if let Some(ticket) = revoked {
                    self.lock_pending()
                        .claims
                        .entry(origin.to_string())
                        .or_insert(ticket);
                }
                return Err(e);
            }
        };

        let popup_id = self
            .lock_pending()
            .requests
            .get(origin)
            .and_then(|p| p.popup_id);
        match popup_id {
            Some(popup_id) => {
                self.popup_closed(popup_id).await;
            }
            None => {
                // 弹窗还没创建出来，直接结算
                self.lock_pending().settle(origin, false);
            }
        }

        if removed {
            tracing::info!(origin = %origin, "DApp disconnected");
        }
        Ok(removed)
    }

    /// 是否有待确认的请求
    pub fn has_pending(&self, origin: &str) -> bool {
        self.lock_pending().requests.contains_key(origin)
    }

    /// 请求切换账户授权，返回用户是否确认
    pub async fn request_account_change(&self, origin: &str) -> bool {
        let ticket = Uuid::new_v4();
        let (resolver, outcome) = oneshot::channel();

        // 置位与登记在同一次状态变更内完成
        let claimed = self
            .hub
            .apply(|s| {
                let Some(conn) = s.dapp.connections.get_mut(origin) else {
                    return false;
                };
                let mut table = self.lock_pending();
                if conn.has_open_popup
                    || table.claims.contains_key(origin)
                    || table.requests.contains_key(origin)
                {
                    return false;
                }
                conn.has_open_popup = true;
                table.claims.insert(origin.to_string(), ticket);
                table.requests.insert(
                    origin.to_string(),
                    PendingRequest {
                        ticket,
                        popup_id: None,
                        resolver,
                    },
                );
                true
            })
            .await;

        match claimed {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(origin = %origin, "Account change ignored: not connected or popup already open");
                return false;
            }
            Err(e) => {
                let mut table = self.lock_pending();
                table.settle_ticket(origin, ticket, false);
                table.release(origin, ticket);
                tracing::warn!(origin = %origin, error = %e, "Account change denied: state not writable");
                return false;
            }
        }

        let approved = match self.popups.open_confirmation(origin).await {
            Ok(popup_id) => {
                if !self.register_popup(origin, ticket, popup_id) {
                    // 请求在弹窗登记前已结算（来源断开或弹窗已关闭）
                    self.popups.close(popup_id).await;
                }
                self.await_outcome(origin, ticket, popup_id, outcome).await
            }
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Failed to open confirmation popup");
                self.lock_pending().settle_ticket(origin, ticket, false);
                false
            }
        };

        self.release_claim(origin, ticket).await;

        tracing::info!(origin = %origin, approved, "Account change request settled");
        approved
    }

    /// 确认事件；返回是否真正结算了一个请求
    pub async fn confirm(&self, origin: &str) -> bool {
        let settled = self.lock_pending().settle(origin, true);
        match settled {
            Some(popup_id) => {
                if let Some(popup_id) = popup_id {
                    self.popups.close(popup_id).await;
                }
                true
            }
            None => false,
        }
    }

    /// 弹窗被关闭（任何方式）；返回是否真正结算了一个请求
    pub async fn popup_closed(&self, popup_id: PopupId) -> bool {
        let settled = {
            let mut table = self.lock_pending();
            match table.origin_of(popup_id) {
                Some(origin) => table.settle(&origin, false).is_some(),
                None => {
                    // 只在有请求等待登记时才记下，避免无主标识堆积
                    if table.requests.values().any(|p| p.popup_id.is_none()) {
                        table.early_closes.insert(popup_id);
                    }
                    false
                }
            }
        };
        self.popups.close(popup_id).await;
        settled
    }

    /// 等待结算或超时
    ///
    /// 计时到期时请求若已被结算，以已经送出的结果为准。
    async fn await_outcome(
        &self,
        origin: &str,
        ticket: Ticket,
        popup_id: PopupId,
        mut outcome: oneshot::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            result = &mut outcome => return result.unwrap_or(false),
            _ = tokio::time::sleep(self.confirmation_timeout) => {}
        }

        let timed_out = self
            .lock_pending()
            .settle_ticket(origin, ticket, false)
            .is_some();
        if !timed_out {
            return outcome.await.unwrap_or(false);
        }

        tracing::warn!(origin = %origin, "Account change confirmation timed out");
        self.popups.close(popup_id).await;
        false
    }

    /// 交还凭据并清除 `hasOpenPopup`；凭据已作废时不动状态
    async fn release_claim(&self, origin: &str, ticket: Ticket) {
        let result = self
            .hub
            .apply(|s| {
                if !self.lock_pending().release(origin, ticket) {
                    return;
                }
                if let Some(conn) = s.dapp.connections.get_mut(origin) {
                    conn.has_open_popup = false;
                }
            })
            .await;

        if let Err(e) = result {
            tracing::error!(origin = %origin, error = %e, "Failed to clear popup flag");
        }
    }

    /// 登记弹窗标识；返回 false 表示请求已结算，弹窗应关闭
    fn register_popup(&self, origin: &str, ticket: Ticket, popup_id: PopupId) -> bool {
        let mut table = self.lock_pending();
        if table.early_closes.remove(&popup_id) {
            table.settle_ticket(origin, ticket, false);
            return false;
        }
        match table.requests.get_mut(origin) {
            Some(pending) if pending.ticket == ticket => {
                pending.popup_id = Some(popup_id);
                true
            }
            _ => false,
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
