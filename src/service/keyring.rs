//! 密钥环协作方接口
//!
//! 签名、派生等真实密码学由外部密钥环实现，这里只消费它的锁定语义。
//! [`InMemoryKeyring`] 是参考实现：密钥材料放在 `Zeroizing` 缓冲区，锁定时清零。

use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::KeyringError;

/// 密钥环
#[async_trait]
pub trait Keyring: Send + Sync {
    /// 锁定并清除内存中的敏感材料
    async fn lock(&self) -> Result<(), KeyringError>;

    async fn is_locked(&self) -> bool;

    /// 校验密码并解锁；密码错误返回 `Ok(false)`
    async fn unlock(&self, password: &str) -> Result<bool, KeyringError>;
}

/// 内存密钥环
pub struct InMemoryKeyring {
    password_digest: Option<[u8; 32]>,
    sealed_seed: Vec<u8>,
    unlocked: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl InMemoryKeyring {
    /// 用密码和（已加密的）种子创建，初始为锁定状态
    pub fn new(password: &str, sealed_seed: Vec<u8>) -> Self {
        Self {
            password_digest: Some(Sha256::digest(password.as_bytes()).into()),
            sealed_seed,
            unlocked: Mutex::new(None),
        }
    }

    /// 没有钱包的密钥环（全新安装）
    pub fn empty() -> Self {
        Self {
            password_digest: None,
            sealed_seed: Vec::new(),
            unlocked: Mutex::new(None),
        }
    }

    /// 当前内存中的密钥材料长度（锁定时为 0）
    pub fn material_len(&self) -> usize {
        self.unlocked
            .lock()
            .map(|g| g.as_ref().map(|m| m.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl Keyring for InMemoryKeyring {
    async fn lock(&self) -> Result<(), KeyringError> {
        let mut guard = self
            .unlocked
            .lock()
            .map_err(|e| KeyringError::Operation(e.to_string()))?;
        // Zeroizing 在 drop 时清零
        guard.take();
        Ok(())
    }

    async fn is_locked(&self) -> bool {
        self.unlocked.lock().map(|g| g.is_none()).unwrap_or(true)
    }

    async fn unlock(&self, password: &str) -> Result<bool, KeyringError> {
        let Some(expected) = self.password_digest else {
            return Err(KeyringError::NoVault);
        };

        let candidate: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        if !bool::from(candidate.ct_eq(&expected)) {
            return Ok(false);
        }

        let mut guard = self
            .unlocked
            .lock()
            .map_err(|e| KeyringError::Operation(e.to_string()))?;
        *guard = Some(Zeroizing::new(self.sealed_seed.clone()));
        Ok(true)
    }
}
