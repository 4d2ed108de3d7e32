//! 快照迁移步骤（3.0.1 → 3.4.3）
//!
//! 每一步都是纯函数。全新安装没有 vault 时只做 no-op 或补默认值，
//! 之后照常被记录为已应用。

use semver::Version;
use serde_json::{json, Map, Value};

use crate::{error::MigrationError, infrastructure::migration::MigrationStep};

/// 默认迁移链
pub fn default_chain() -> Vec<MigrationStep> {
    vec![
        MigrationStep::new(Version::new(3, 0, 1), "label_accounts", label_accounts),
        MigrationStep::new(Version::new(3, 1, 0), "rename_chain_to_network", rename_chain_to_network),
        MigrationStep::new(Version::new(3, 2, 0), "expand_dapp_connections", expand_dapp_connections),
        MigrationStep::new(Version::new(3, 3, 0), "lock_timeout_to_minutes", lock_timeout_to_minutes),
        MigrationStep::new(Version::new(3, 4, 3), "price_quotes_and_session_flags", price_quotes_and_session_flags),
    ]
}

fn vault_mut(v: &mut Value) -> Option<&mut Map<String, Value>> {
    v.get_mut("vault").and_then(Value::as_object_mut)
}

/// 3.0.1：账户补 label；旧版本账户可能只是地址字符串
fn label_accounts(mut v: Value) -> Result<Value, MigrationError> {
    let Some(vault) = vault_mut(&mut v) else {
        return Ok(v);
    };

    let accounts = match vault.get_mut("accounts") {
        None | Some(Value::Null) => return Ok(v),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(MigrationError::new("3.0.1", "vault.accounts is not an array")),
    };

    for (i, account) in accounts.iter_mut().enumerate() {
        let label = format!("Account {}", i + 1);
        if let Some(address) = account.as_str().map(str::to_owned) {
            *account = json!({ "address": address, "label": label });
            continue;
        }
        match account {
            Value::Object(obj) => {
                if !obj.get("label").is_some_and(Value::is_string) {
                    obj.insert("label".to_string(), Value::String(label));
                }
            }
            _ => {
                return Err(MigrationError::new(
                    "3.0.1",
                    format!("account #{} has unexpected shape", i),
                ))
            }
        }
    }

    Ok(v)
}

/// 3.1.0：vault.chain 改名为 vault.network
fn rename_chain_to_network(mut v: Value) -> Result<Value, MigrationError> {
    let Some(vault) = vault_mut(&mut v) else {
        return Ok(v);
    };

    if let Some(chain) = vault.remove("chain") {
        let Value::String(chain) = chain else {
            return Err(MigrationError::new("3.1.0", "vault.chain is not a string"));
        };
        vault.entry("network").or_insert(Value::String(chain));
    }
    vault
        .entry("network")
        .or_insert_with(|| Value::String("mainnet".to_string()));

    Ok(v)
}

/// 3.2.0：扁平的 `{origin: [accounts]}` 展开为完整连接记录
fn expand_dapp_connections(mut v: Value) -> Result<Value, MigrationError> {
    let Some(root) = v.as_object_mut() else {
        return Ok(v);
    };

    let legacy = match root.remove("dapp") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(obj)) if obj.contains_key("connections") => {
            root.insert("dapp".to_string(), Value::Object(obj));
            return Ok(v);
        }
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(MigrationError::new("3.2.0", "dapp is not an object")),
    };

    let connected_at = chrono::Utc::now().to_rfc3339();
    let mut connections = Map::new();
    for (origin, accounts) in legacy {
        let Value::Array(accounts) = accounts else {
            return Err(MigrationError::new(
                "3.2.0",
                format!("permissions for {} are not a list", origin),
            ));
        };
        let permitted: Vec<Value> = accounts.into_iter().filter(Value::is_string).collect();
        connections.insert(
            origin,
            json!({
                "permittedAccounts": permitted,
                "hasOpenPopup": false,
                "connectedAt": connected_at,
            }),
        );
    }

    root.insert("dapp".to_string(), json!({ "connections": connections }));
    Ok(v)
}

/// 3.3.0：vault.lockTimeout（秒）改为 vault.settings.autoLockMinutes
fn lock_timeout_to_minutes(mut v: Value) -> Result<Value, MigrationError> {
    let Some(vault) = vault_mut(&mut v) else {
        return Ok(v);
    };

    let minutes = match vault.remove("lockTimeout") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => {
            let secs = n
                .as_u64()
                .ok_or_else(|| MigrationError::new("3.3.0", "vault.lockTimeout is negative"))?;
            Some(secs.div_ceil(60).max(1))
        }
        Some(_) => return Err(MigrationError::new("3.3.0", "vault.lockTimeout is not a number")),
    };

    let settings = vault
        .entry("settings")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| MigrationError::new("3.3.0", "vault.settings is not an object"))?;

    match minutes {
        Some(m) => {
            settings.insert("autoLockMinutes".to_string(), json!(m));
        }
        None => {
            settings.entry("autoLockMinutes").or_insert(json!(15));
        }
    }

    Ok(v)
}

/// 3.4.3：price.usd 改为 price.quotes（丢弃非数值报价），缺失的 sessionFlags 补默认值
fn price_quotes_and_session_flags(mut v: Value) -> Result<Value, MigrationError> {
    let Some(root) = v.as_object_mut() else {
        return Ok(v);
    };

    let price = root
        .entry("price")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| MigrationError::new("3.4.3", "price is not an object"))?;

    if let Some(usd) = price.remove("usd") {
        let Value::Object(usd) = usd else {
            return Err(MigrationError::new("3.4.3", "price.usd is not an object"));
        };
        let quotes = price
            .entry("quotes")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .ok_or_else(|| MigrationError::new("3.4.3", "price.quotes is not an object"))?;
        for (symbol, quote) in usd {
            if !quote.is_number() {
                tracing::warn!(symbol = %symbol, "Dropping non-numeric legacy price quote");
                continue;
            }
            quotes.entry(symbol).or_insert(quote);
        }
    }
    price.entry("quotes").or_insert_with(|| json!({}));

    root.entry("sessionFlags")
        .or_insert_with(|| json!({ "networkStatus": "idle", "isLocked": true }));

    Ok(v)
}
