//! 后台进程端到端流程
//!
//! 迁移 → 恢复 → 复制推送 → 解锁 / 闲置锁定 → DApp 账户切换确认

mod common;

use std::{sync::Arc, time::Duration};

use common::{fresh_backend, legacy_snapshot, start_backend, PASSWORD};
use ironkeeper::{
    domain::{NetworkStatus, Notification, PortMessage, Snapshot, UiIntent},
    infrastructure::storage::{KeyValueStorage, MemoryStorage, APPLIED_MIGRATIONS_KEY, SNAPSHOT_KEY},
    service::{inactivity_lock::LockState, polling_guard::should_block_polling_now},
};
use tokio::sync::broadcast;

fn state_of(msg: PortMessage) -> Snapshot {
    match msg {
        PortMessage::StateChange(s) => s,
    }
}

async fn next_popup(rx: &mut broadcast::Receiver<Notification>) -> uuid::Uuid {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Ok(Notification::PopupOpened { popup_id, .. })) => return popup_id,
            Ok(Ok(_)) => continue,
            other => panic!("no popup announced: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_legacy_snapshot_is_migrated_once() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(SNAPSHOT_KEY, legacy_snapshot()).await.unwrap();

    let backend = start_backend(storage.clone()).await;
    assert_eq!(backend.state.migrations.applied.len(), 5);
    assert!(backend.state.migrations.failed.is_empty());

    let snapshot = backend.state.hub.snapshot().await;
    assert_eq!(snapshot.schema_version, "3.4.3");
    let vault = snapshot.vault.clone().unwrap();
    assert_eq!(vault.network, "sepolia");
    assert_eq!(vault.settings.auto_lock_minutes, Some(1));
    assert_eq!(vault.accounts[0].label, "Account 1");
    assert_eq!(vault.accounts[1].label, "Savings");
    assert_eq!(snapshot.price.quotes.get("ETH"), Some(&3100.5));
    assert!(snapshot.dapp.connections["https://app.example"]
        .permitted_accounts
        .contains("0xaaa"));

    let applied = storage.get(APPLIED_MIGRATIONS_KEY).await.unwrap().unwrap();
    assert_eq!(applied.as_array().unwrap().len(), 5);

    // 进程重启：同一存储，不再重复迁移
    drop(backend);
    let restarted = start_backend(storage).await;
    assert!(restarted.state.migrations.applied.is_empty());
    assert_eq!(restarted.state.hub.snapshot().await, snapshot);
}

#[tokio::test]
async fn test_failed_migration_keeps_wallet_usable() {
    let storage = Arc::new(MemoryStorage::new());
    let stored_vault = serde_json::json!({ "accounts": ["0xaaa", 42], "chain": "sepolia" });
    storage
        .set(
            SNAPSHOT_KEY,
            serde_json::json!({
                "schemaVersion": "3.0.0",
                "vault": stored_vault,
                "dapp": { "https://app.example": ["0xaaa"] },
                "price": { "usd": { "ETH": null } }
            }),
        )
        .await
        .unwrap();

    let backend = start_backend(storage.clone()).await;
    assert_eq!(backend.state.migrations.failed.len(), 1);

    let snapshot = backend.state.hub.snapshot().await;
    let vault = snapshot.vault.clone().unwrap();
    assert_eq!(vault.network, "sepolia");
    assert_eq!(vault.accounts[0].address, "0xaaa");
    assert!(backend
        .state
        .dapps
        .permitted_accounts("https://app.example")
        .await
        .unwrap()
        .contains("0xaaa"));
    assert!(snapshot.price.quotes.is_empty());

    // 解锁写快照时不覆盖存储中未迁移完的 vault
    assert!(backend.state.lock.unlock(PASSWORD).await.unwrap());
    let stored = storage.get(SNAPSHOT_KEY).await.unwrap().unwrap();
    assert_eq!(stored["vault"]["accounts"], serde_json::json!(["0xaaa", 42]));
    assert_eq!(stored["vault"]["network"], "sepolia");
    assert_eq!(stored["sessionFlags"]["isLocked"], false);
    assert!(stored["dapp"]["connections"]["https://app.example"].is_object());

    // 重启后仍然可读
    drop(backend);
    let restarted = start_backend(storage).await;
    let vault = restarted.state.hub.snapshot().await.vault.unwrap();
    assert_eq!(vault.accounts[0].address, "0xaaa");
}

#[tokio::test]
async fn test_fresh_install_records_every_step() {
    let backend = fresh_backend().await;
    assert_eq!(backend.state.migrations.applied.len(), 5);

    let snapshot = backend.state.hub.snapshot().await;
    assert!(snapshot.vault.is_none());
    assert!(snapshot.session_flags.is_locked);
    assert!(backend.state.lock.is_locked().await);
}

#[tokio::test]
async fn test_ports_receive_snapshot_then_changes_only() {
    let backend = fresh_backend().await;
    let state = &backend.state;

    let mut popup = state.replication.attach_to(&state.hub, "popup").await;
    let first = state_of(popup.receiver.recv().await.unwrap());
    assert_eq!(first, state.hub.snapshot().await);

    assert!(state.lock.unlock(PASSWORD).await.unwrap());
    let pushed = state_of(popup.receiver.recv().await.unwrap());
    assert!(!pushed.session_flags.is_locked);
    assert_eq!(pushed.session_flags.last_login, Some(common::START_MS / 1000));

    // 内容未变：不推送
    state
        .hub
        .apply(|s| s.session_flags.is_locked = false)
        .await
        .unwrap();
    assert!(popup.receiver.try_recv().is_err());

    // 后接入的端先拿到完整快照
    let mut fullpage = state.replication.attach_to(&state.hub, "fullpage").await;
    assert_eq!(state_of(fullpage.receiver.recv().await.unwrap()), pushed);
    assert_eq!(state.replication.attached(), 2);

    state.replication.detach(popup.id);
    assert_eq!(state.replication.attached(), 1);
}

#[tokio::test]
async fn test_inactivity_locks_without_open_surfaces() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(SNAPSHOT_KEY, legacy_snapshot()).await.unwrap();
    let backend = start_backend(storage).await;
    let state = &backend.state;
    let mut notifications = state.bus.subscribe();

    state
        .intents
        .dispatch(UiIntent::Unlock {
            password: PASSWORD.into(),
        })
        .await
        .unwrap();
    assert!(matches!(state.lock.state().await, LockState::Unlocked(_)));

    // 自动锁定 1 分钟；61 秒无输入
    backend.clock.advance(61_000);
    assert!(state.lock.check().await);

    assert!(state.lock.is_locked().await);
    assert!(backend.keyring.material_len() == 0);
    assert!(state.hub.snapshot().await.session_flags.is_locked);
    assert_eq!(notifications.recv().await.unwrap(), Notification::LockWallet);
}

#[tokio::test]
async fn test_input_events_keep_wallet_unlocked() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(SNAPSHOT_KEY, legacy_snapshot()).await.unwrap();
    let backend = start_backend(storage).await;
    let state = &backend.state;

    state.lock.unlock(PASSWORD).await.unwrap();

    for _ in 0..3 {
        backend.clock.advance(45_000);
        let touched = state
            .intents
            .dispatch(UiIntent::Activity {
                event: "mousedown".into(),
            })
            .await
            .unwrap();
        assert!(touched);
        assert!(!state.lock.check().await);
    }

    // 非输入事件不算活动
    backend.clock.advance(45_000);
    let touched = state
        .intents
        .dispatch(UiIntent::Activity {
            event: "visibilitychange".into(),
        })
        .await
        .unwrap();
    assert!(!touched);
    backend.clock.advance(15_000);
    assert!(state.lock.check().await);
}

#[tokio::test]
async fn test_account_change_confirmed_through_intent() {
    let backend = fresh_backend().await;
    let state = backend.state.clone();
    let origin = "https://dex.example";
    let mut notifications = state.bus.subscribe();

    state
        .dapps
        .connect(origin, ["0x1".to_string()])
        .await
        .unwrap();

    let request = tokio::spawn({
        let state = state.clone();
        async move { state.dapps.request_account_change(origin).await }
    });

    next_popup(&mut notifications).await;
    // 第二个请求在弹窗打开期间被拒绝
    assert!(!state.dapps.request_account_change(origin).await);

    let settled = state
        .intents
        .dispatch(UiIntent::ConfirmConnection {
            origin: origin.into(),
        })
        .await
        .unwrap();
    assert!(settled);
    assert!(request.await.unwrap());
    assert!(!state.hub.snapshot().await.dapp.connections[origin].has_open_popup);
}

#[tokio::test]
async fn test_account_change_denied_when_popup_closed() {
    let backend = fresh_backend().await;
    let state = backend.state.clone();
    let origin = "https://nft.example";
    let mut notifications = state.bus.subscribe();

    state.dapps.connect(origin, Vec::new()).await.unwrap();

    let request = tokio::spawn({
        let state = state.clone();
        async move { state.dapps.request_account_change(origin).await }
    });

    let popup_id = next_popup(&mut notifications).await;
    state
        .intents
        .dispatch(UiIntent::PopupClosed { popup_id })
        .await
        .unwrap();

    assert!(!request.await.unwrap());
    assert!(!state.dapps.has_pending(origin));
    assert!(!state.hub.snapshot().await.dapp.connections[origin].has_open_popup);

    // 已结算后的确认事件无效
    let late = state
        .intents
        .dispatch(UiIntent::ConfirmConnection {
            origin: origin.into(),
        })
        .await
        .unwrap();
    assert!(!late);
}

#[tokio::test]
async fn test_polling_guard_follows_session_flags() {
    let backend = fresh_backend().await;
    let state = &backend.state;

    // 从未登录
    assert!(should_block_polling_now(&state.hub).await);

    state.lock.unlock(PASSWORD).await.unwrap();
    assert!(!should_block_polling_now(&state.hub).await);

    state
        .intents
        .dispatch(UiIntent::SwitchNetwork {
            network: "sepolia".into(),
        })
        .await
        .unwrap();
    assert!(should_block_polling_now(&state.hub).await);

    state
        .intents
        .dispatch(UiIntent::NetworkSwitched {
            network: "sepolia".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        state.hub.snapshot().await.session_flags.network_status,
        NetworkStatus::Idle
    );
    assert!(!should_block_polling_now(&state.hub).await);
}
