//! 快照领域模型
//!
//! 快照是唯一跨上下文共享的可序列化状态。特权进程持有唯一的权威副本，
//! UI 端拿到的都是只读投影。JSON 字段使用 camelCase，和页面脚本约定一致。

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// 当前快照结构版本
pub const CURRENT_SCHEMA_VERSION: &str = "3.4.3";

/// 账户标识（地址）
pub type AccountId = String;

/// 页面来源（scheme + host）
pub type Origin = String;

/// 快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// 全新安装时没有 vault
    #[serde(default)]
    pub vault: Option<VaultState>,
    #[serde(default)]
    pub dapp: DappState,
    #[serde(default)]
    pub price: PriceState,
    #[serde(default)]
    pub session_flags: SessionFlags,
}

fn default_schema_version() -> String {
    CURRENT_SCHEMA_VERSION.to_string()
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            vault: None,
            dapp: DappState::default(),
            price: PriceState::default(),
            session_flags: SessionFlags::default(),
        }
    }
}

impl Snapshot {
    /// 结构哈希：按内容而不是引用比较
    ///
    /// 所有 map 都是 `BTreeMap`，序列化结果是确定的。
    /// 编码失败时返回一次性哈希，保证这次变更照常推送。
    pub fn structural_hash(&self) -> String {
        digest_encoded(serde_json::to_vec(self))
    }

    /// 逐段解析存储中的快照
    ///
    /// 某一段无法识别只影响这一段：该段取默认值（vault 尽量保留可识别的账户），
    /// 原始值放进 `unreadable`，其余段照常解析。根不是对象时返回 None。
    pub fn decode_sections(raw: Value) -> Option<DecodedSnapshot> {
        let Value::Object(mut root) = raw else {
            return None;
        };
        let mut unreadable = BTreeMap::new();
        let mut snapshot = Snapshot::default();

        match root.remove("schemaVersion") {
            None => {}
            Some(Value::String(version)) => snapshot.schema_version = version,
            Some(other) => {
                tracing::warn!(section = "schemaVersion", "Snapshot section unreadable, keeping stored value");
                unreadable.insert("schemaVersion".to_string(), other);
            }
        }
        snapshot.vault = decode_section(&mut root, "vault", &mut unreadable, salvage_vault);
        snapshot.dapp = decode_section(&mut root, "dapp", &mut unreadable, |_| None);
        snapshot.price = decode_section(&mut root, "price", &mut unreadable, |_| None);
        snapshot.session_flags = decode_section(&mut root, "sessionFlags", &mut unreadable, |_| None);

        Some(DecodedSnapshot {
            snapshot,
            unreadable,
        })
    }

    /// 用户设置的自动锁定超时（分钟）
    pub fn auto_lock_minutes(&self) -> Option<u32> {
        self.vault.as_ref().and_then(|v| v.settings.auto_lock_minutes)
    }

    /// 进程重启后弹窗不可能还开着，清除所有残留标记
    ///
    /// 返回被清除的来源数量。
    pub fn clear_dangling_popups(&mut self) -> usize {
        let mut cleared = 0;
        for conn in self.dapp.connections.values_mut() {
            if conn.has_open_popup {
                conn.has_open_popup = false;
                cleared += 1;
            }
        }
        cleared
    }
}

fn digest_encoded(encoded: serde_json::Result<Vec<u8>>) -> String {
    match encoded {
        Ok(encoded) => hex::encode(Sha256::digest(&encoded)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode snapshot for hashing");
            format!("unhashable-{}", uuid::Uuid::new_v4())
        }
    }
}

/// 逐段解析结果
#[derive(Debug)]
pub struct DecodedSnapshot {
    pub snapshot: Snapshot,
    /// 无法完整识别的段，按 JSON 字段名保存原始值
    pub unreadable: BTreeMap<String, Value>,
}

fn decode_section<T: DeserializeOwned + Default>(
    root: &mut Map<String, Value>,
    key: &str,
    unreadable: &mut BTreeMap<String, Value>,
    salvage: impl FnOnce(&Value) -> Option<T>,
) -> T {
    let Some(raw) = root.remove(key) else {
        return T::default();
    };
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(section) => section,
        Err(e) => {
            tracing::warn!(section = key, error = %e, "Snapshot section unreadable, keeping stored value");
            let salvaged = salvage(&raw).unwrap_or_default();
            unreadable.insert(key.to_string(), raw);
            salvaged
        }
    }
}

/// 只保留能识别的账户；旧版本的纯地址字符串和缺 label 的账户按位置补 label
fn salvage_vault(raw: &Value) -> Option<Option<VaultState>> {
    let mut vault = raw.as_object()?.clone();
    if let Some(Value::Array(accounts)) = vault.get_mut("accounts") {
        let readable: Vec<Value> = accounts
            .iter()
            .enumerate()
            .filter_map(|(i, account)| {
                let label = format!("Account {}", i + 1);
                match account {
                    Value::String(address) => Some(json!({ "address": address, "label": label })),
                    Value::Object(obj) if obj.get("address").is_some_and(Value::is_string) => {
                        let mut obj = obj.clone();
                        if !obj.get("label").is_some_and(Value::is_string) {
                            obj.insert("label".to_string(), Value::String(label));
                        }
                        Some(Value::Object(obj))
                    }
                    _ => None,
                }
            })
            .collect();
        *accounts = readable;
    }
    serde_json::from_value::<VaultState>(Value::Object(vault))
        .ok()
        .map(Some)
}

/// 钱包（密钥环元数据，不含密钥材料）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultState {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub selected_account: Option<AccountId>,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub settings: WalletSettings,
}

pub(crate) fn default_network() -> String {
    "mainnet".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: AccountId,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSettings {
    #[serde(default)]
    pub auto_lock_minutes: Option<u32>,
}

/// DApp 连接表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappState {
    #[serde(default)]
    pub connections: BTreeMap<Origin, DappConnection>,
}

/// 单个来源的连接记录
///
/// 同一来源同一时间最多一个待确认弹窗：`has_open_popup` 在创建弹窗前置位，
/// 在弹窗关闭或超时时清除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DappConnection {
    #[serde(default)]
    pub permitted_accounts: BTreeSet<AccountId>,
    #[serde(default)]
    pub has_open_popup: bool,
    pub connected_at: DateTime<Utc>,
}

impl DappConnection {
    pub fn new(accounts: impl IntoIterator<Item = AccountId>, connected_at: DateTime<Utc>) -> Self {
        Self {
            permitted_accounts: accounts.into_iter().collect(),
            has_open_popup: false,
            connected_at,
        }
    }
}

/// 价格缓存
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceState {
    #[serde(default)]
    pub quotes: BTreeMap<String, f64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// 网络状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    #[default]
    Idle,
    Loading,
    Switching,
}

/// 会话全局标记
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFlags {
    #[serde(default)]
    pub network_status: NetworkStatus,
    /// 首次成功登录的时间（秒）；None 表示从未登录
    #[serde(default)]
    pub last_login: Option<i64>,
    #[serde(default = "default_locked")]
    pub is_locked: bool,
}

fn default_locked() -> bool {
    true
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            network_status: NetworkStatus::Idle,
            last_login: None,
            is_locked: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot {
            vault: Some(VaultState {
                accounts: vec![Account {
                    address: "0xabc".into(),
                    label: "Account 1".into(),
                }],
                selected_account: Some("0xabc".into()),
                network: "mainnet".into(),
                settings: WalletSettings {
                    auto_lock_minutes: Some(15),
                },
            }),
            ..Snapshot::default()
        };
        snapshot.dapp.connections.insert(
            "https://app.example".into(),
            DappConnection::new(["0xabc".to_string()], Utc::now()),
        );
        snapshot
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("schemaVersion").is_some());
        assert!(json.get("sessionFlags").is_some());
        assert_eq!(json["sessionFlags"]["networkStatus"], "idle");
        let conn = &json["dapp"]["connections"]["https://app.example"];
        assert_eq!(conn["hasOpenPopup"], false);
        assert!(conn["permittedAccounts"].is_array());
    }

    #[test]
    fn test_structural_hash_ignores_identity() {
        let a = sample();
        let b = a.clone();
        assert_eq!(a.structural_hash(), b.structural_hash());

        let mut c = a.clone();
        c.session_flags.network_status = NetworkStatus::Switching;
        assert_ne!(a.structural_hash(), c.structural_hash());
    }

    #[test]
    fn test_encoding_failure_never_suppresses_a_push() {
        let failure = || serde_json::from_str::<Value>("{").map(|_| Vec::new());
        let first = digest_encoded(failure());
        let second = digest_encoded(failure());
        assert_ne!(first, second);
        assert_ne!(first, digest_encoded(Ok(Vec::new())));
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let snapshot: Snapshot = serde_json::from_str(r#"{"schemaVersion":"3.0.0"}"#).unwrap();
        assert!(snapshot.vault.is_none());
        assert!(snapshot.dapp.connections.is_empty());
        assert!(snapshot.session_flags.is_locked);
    }

    #[test]
    fn test_unreadable_section_does_not_discard_others() {
        let raw = json!({
            "schemaVersion": "3.4.3",
            "vault": { "accounts": ["0xaaa", 42], "network": "sepolia" },
            "dapp": { "connections": {
                "https://app.example": {
                    "permittedAccounts": ["0xaaa"],
                    "connectedAt": "2023-07-22T04:26:40Z"
                }
            } },
            "price": { "quotes": { "ETH": null } }
        });

        let decoded = Snapshot::decode_sections(raw.clone()).unwrap();
        let vault = decoded.snapshot.vault.unwrap();
        assert_eq!(vault.network, "sepolia");
        assert_eq!(vault.accounts.len(), 1);
        assert_eq!(vault.accounts[0].address, "0xaaa");
        assert!(decoded.snapshot.dapp.connections["https://app.example"]
            .permitted_accounts
            .contains("0xaaa"));
        assert!(decoded.snapshot.price.quotes.is_empty());

        assert_eq!(decoded.unreadable["vault"], raw["vault"]);
        assert_eq!(decoded.unreadable["price"], raw["price"]);
        assert!(!decoded.unreadable.contains_key("dapp"));
    }

    #[test]
    fn test_non_object_root_is_not_a_snapshot() {
        assert!(Snapshot::decode_sections(json!([1, 2])).is_none());
    }

    #[test]
    fn test_clear_dangling_popups() {
        let mut snapshot = sample();
        snapshot
            .dapp
            .connections
            .get_mut("https://app.example")
            .unwrap()
            .has_open_popup = true;
        assert_eq!(snapshot.clear_dangling_popups(), 1);
        assert_eq!(snapshot.clear_dangling_popups(), 0);
    }
}
