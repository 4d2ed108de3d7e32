//! 持久化存储
//!
//! 键值存储抽象 + 快照存取。写入是整体原子替换：先写临时文件再 rename，
//! 读者看不到写了一半的数据；同一进程内 save 之后的 load 立即可见，没有缓存。

use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::{domain::Snapshot, error::StorageError};

/// 快照键
pub const SNAPSHOT_KEY: &str = "snapshot";
/// 已应用迁移版本键
pub const APPLIED_MIGRATIONS_KEY: &str = "appliedMigrations";
/// 锁定计时器键
pub const LOCK_TIMER_KEY: &str = "lockTimer";

/// 键值存储
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// 读取；不存在或内容不是合法 JSON 时返回 None
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// 整体写入
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// 文件存储：每个键一个 `<key>.json`
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// 创建存储目录（如不存在）
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(key, e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Malformed JSON in storage, treating as absent");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(&value).map_err(|e| StorageError::Encode {
            key: key.to_string(),
            source: e,
        })?;
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let owned_key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut tmp =
                NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(owned_key.clone(), e))?;
            tmp.write_all(&encoded)
                .map_err(|e| StorageError::io(owned_key.clone(), e))?;
            tmp.as_file()
                .sync_all()
                .map_err(|e| StorageError::io(owned_key.clone(), e))?;
            tmp.persist(&path)
                .map_err(|e| StorageError::io(owned_key, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }
}

/// 内存存储（测试和无持久化运行时）
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Task(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Task(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Task(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// 加载时无法识别的快照段
struct RetainedSection {
    raw: Value,
    /// 加载后内存中该段的序列化形式
    loaded: Value,
}

/// 快照存取
///
/// 无法识别的段在内存里是默认值，但存储中的原始值不会被这些默认值覆盖：
/// 只要该段没有被新状态改写，保存时写回原始值。
#[derive(Clone)]
pub struct SnapshotStore {
    storage: Arc<dyn KeyValueStorage>,
    retained: Arc<Mutex<BTreeMap<String, RetainedSection>>>,
}

impl SnapshotStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            retained: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn storage(&self) -> Arc<dyn KeyValueStorage> {
        self.storage.clone()
    }

    /// 读取快照；根不是对象时视为不存在
    pub async fn load(&self) -> Result<Option<Snapshot>, StorageError> {
        let Some(raw) = self.storage.get(SNAPSHOT_KEY).await? else {
            return Ok(None);
        };

        let Some(decoded) = Snapshot::decode_sections(raw) else {
            tracing::warn!("Stored snapshot is not an object, treating as absent");
            return Ok(None);
        };

        let projected = encode(&decoded.snapshot)?;
        let mut retained = self.lock_retained();
        retained.clear();
        for (key, raw) in decoded.unreadable {
            let loaded = projected.get(&key).cloned().unwrap_or(Value::Null);
            retained.insert(key, RetainedSection { raw, loaded });
        }
        if !retained.is_empty() {
            tracing::warn!(
                sections = ?retained.keys().collect::<Vec<_>>(),
                "Stored snapshot partially unreadable, original sections preserved"
            );
        }

        Ok(Some(decoded.snapshot))
    }

    /// 整体写入快照
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let mut value = encode(snapshot)?;
        let rewritten = self.merge_retained(&mut value);
        self.storage.set(SNAPSHOT_KEY, value).await?;

        if !rewritten.is_empty() {
            let mut retained = self.lock_retained();
            for key in &rewritten {
                retained.remove(key);
            }
            tracing::info!(sections = ?rewritten, "Unreadable snapshot sections replaced by new state");
        }
        Ok(())
    }

    /// 未被改写的段换回原始值；返回已被改写的段
    fn merge_retained(&self, value: &mut Value) -> Vec<String> {
        let Some(obj) = value.as_object_mut() else {
            return Vec::new();
        };
        let retained = self.lock_retained();
        let mut rewritten = Vec::new();
        for (key, section) in retained.iter() {
            let untouched = match obj.get(key) {
                Some(current) => *current == section.loaded,
                None => section.loaded.is_null(),
            };
            if untouched {
                obj.insert(key.clone(), section.raw.clone());
            } else {
                rewritten.push(key.clone());
            }
        }
        rewritten
    }

    fn lock_retained(&self) -> MutexGuard<'_, BTreeMap<String, RetainedSection>> {
        match self.retained.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn encode(snapshot: &Snapshot) -> Result<Value, StorageError> {
    serde_json::to_value(snapshot).map_err(|e| StorageError::Encode {
        key: SNAPSHOT_KEY.to_string(),
        source: e,
    })
}
