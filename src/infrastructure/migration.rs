//! 快照迁移管理模块
//! 提供迁移版本管理、按序执行和已应用版本记录
//!
//! 每一步成功后先持久化快照、再记录版本，然后才执行下一步；
//! 进程在链中途被杀掉，重启后从最高已应用版本之后继续。

use std::{collections::BTreeSet, sync::Arc};

use semver::Version;
use serde_json::{json, Value};

use crate::{
    error::{MigrationError, StorageError},
    infrastructure::storage::{KeyValueStorage, APPLIED_MIGRATIONS_KEY, SNAPSHOT_KEY},
};

/// 迁移变换：旧结构 JSON -> 新结构 JSON
pub type MigrationFn = fn(Value) -> Result<Value, MigrationError>;

/// 迁移步骤
#[derive(Clone)]
pub struct MigrationStep {
    pub target_version: Version,
    pub name: &'static str,
    pub apply: MigrationFn,
}

impl MigrationStep {
    pub fn new(target_version: Version, name: &'static str, apply: MigrationFn) -> Self {
        Self {
            target_version,
            name,
            apply,
        }
    }
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("target_version", &self.target_version)
            .field("name", &self.name)
            .finish()
    }
}

/// 迁移结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<Version>,
    pub failed: Vec<Version>,
    /// 已记录或低于高水位的步骤
    pub skipped: Vec<Version>,
}

/// 迁移执行器
pub struct MigrationRunner {
    storage: Arc<dyn KeyValueStorage>,
    steps: Vec<MigrationStep>,
}

impl MigrationRunner {
    /// 步骤按目标版本升序排列
    pub fn new(storage: Arc<dyn KeyValueStorage>, mut steps: Vec<MigrationStep>) -> Self {
        steps.sort_by(|a, b| a.target_version.cmp(&b.target_version));
        Self { storage, steps }
    }

    /// 获取已应用的迁移版本
    pub async fn applied_versions(&self) -> Result<BTreeSet<Version>, StorageError> {
        let Some(raw) = self.storage.get(APPLIED_MIGRATIONS_KEY).await? else {
            return Ok(BTreeSet::new());
        };

        let versions = raw
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| match Version::parse(s) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            tracing::warn!(version = %s, error = %e, "Ignoring unparsable applied migration version");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(versions)
    }

    /// 获取当前迁移版本（高水位）
    pub async fn current_version(&self) -> Result<Option<Version>, StorageError> {
        Ok(self.applied_versions().await?.into_iter().next_back())
    }

    async fn record_applied(&self, applied: &BTreeSet<Version>) -> Result<(), StorageError> {
        let list: Vec<String> = applied.iter().map(|v| v.to_string()).collect();
        self.storage.set(APPLIED_MIGRATIONS_KEY, json!(list)).await
    }

    /// 执行迁移
    ///
    /// 只有存储 I/O 失败会返回错误；单步失败记日志、跳过该步，
    /// 后续步骤在迁移前的数据上继续。
    pub async fn run(&self) -> Result<MigrationReport, StorageError> {
        tracing::info!("Running snapshot migrations...");

        let mut applied = self.applied_versions().await?;
        let high_water = applied.iter().next_back().cloned();
        let mut report = MigrationReport::default();

        // 全新安装：没有快照，在空对象上跑，让每一步自己决定 no-op 或补默认值
        let mut current = self
            .storage
            .get(SNAPSHOT_KEY)
            .await?
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));

        for step in &self.steps {
            let already = applied.contains(&step.target_version)
                || high_water
                    .as_ref()
                    .is_some_and(|hw| step.target_version <= *hw);
            if already {
                report.skipped.push(step.target_version.clone());
                continue;
            }

            match (step.apply)(current.clone()) {
                Ok(mut next) => {
                    if let Some(obj) = next.as_object_mut() {
                        obj.insert(
                            "schemaVersion".to_string(),
                            Value::String(step.target_version.to_string()),
                        );
                    }

                    self.storage.set(SNAPSHOT_KEY, next.clone()).await?;
                    applied.insert(step.target_version.clone());
                    self.record_applied(&applied).await?;

                    tracing::info!(
                        version = %step.target_version,
                        name = step.name,
                        "✅ Applied snapshot migration"
                    );
                    current = next;
                    report.applied.push(step.target_version.clone());
                }
                Err(e) => {
                    tracing::error!(
                        version = %step.target_version,
                        name = step.name,
                        error = %e,
                        "Snapshot migration failed, continuing with unmigrated data"
                    );
                    report.failed.push(step.target_version.clone());
                }
            }
        }

        tracing::info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Snapshot migrations completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryStorage;

    fn add_marker(mut v: Value) -> Result<Value, MigrationError> {
        let count = v.get("marker").and_then(Value::as_u64).unwrap_or(0);
        v["marker"] = json!(count + 1);
        Ok(v)
    }

    fn always_fail(_: Value) -> Result<Value, MigrationError> {
        Err(MigrationError::new("2.0.0", "boom"))
    }

    fn steps() -> Vec<MigrationStep> {
        vec![
            MigrationStep::new(Version::new(1, 1, 0), "second", add_marker),
            MigrationStep::new(Version::new(1, 0, 0), "first", add_marker),
        ]
    }

    #[tokio::test]
    async fn test_steps_run_in_ascending_order_and_are_recorded() {
        let storage = Arc::new(MemoryStorage::new());
        let runner = MigrationRunner::new(storage.clone(), steps());

        let report = runner.run().await.unwrap();
        assert_eq!(
            report.applied,
            vec![Version::new(1, 0, 0), Version::new(1, 1, 0)]
        );

        let snapshot = storage.get(SNAPSHOT_KEY).await.unwrap().unwrap();
        assert_eq!(snapshot["marker"], 2);
        assert_eq!(snapshot["schemaVersion"], "1.1.0");
        assert_eq!(
            runner.current_version().await.unwrap(),
            Some(Version::new(1, 1, 0))
        );
    }

    #[tokio::test]
    async fn test_second_run_applies_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let runner = MigrationRunner::new(storage.clone(), steps());
        runner.run().await.unwrap();
        let once = storage.get(SNAPSHOT_KEY).await.unwrap();

        let report = runner.run().await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(storage.get(SNAPSHOT_KEY).await.unwrap(), once);
    }

    #[tokio::test]
    async fn test_resume_after_partial_chain() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(APPLIED_MIGRATIONS_KEY, json!(["1.0.0"]))
            .await
            .unwrap();
        storage
            .set(SNAPSHOT_KEY, json!({ "marker": 1 }))
            .await
            .unwrap();

        let runner = MigrationRunner::new(storage.clone(), steps());
        let report = runner.run().await.unwrap();
        assert_eq!(report.applied, vec![Version::new(1, 1, 0)]);
        assert_eq!(report.skipped, vec![Version::new(1, 0, 0)]);
        assert_eq!(storage.get(SNAPSHOT_KEY).await.unwrap().unwrap()["marker"], 2);
    }

    #[tokio::test]
    async fn test_failed_step_is_skipped_and_chain_continues() {
        let storage = Arc::new(MemoryStorage::new());
        let mut chain = steps();
        chain.push(MigrationStep::new(Version::new(1, 0, 5), "broken", always_fail));
        let runner = MigrationRunner::new(storage.clone(), chain);

        let report = runner.run().await.unwrap();
        assert_eq!(report.failed, vec![Version::new(1, 0, 5)]);
        assert_eq!(report.applied.len(), 2);
        assert_eq!(storage.get(SNAPSHOT_KEY).await.unwrap().unwrap()["marker"], 2);
        assert!(!runner
            .applied_versions()
            .await
            .unwrap()
            .contains(&Version::new(1, 0, 5)));
    }
}
