//! 健康检查模块
//! 探测持久化存储，附带保活与 UI 端接入情况

use serde::Serialize;

use crate::infrastructure::storage::{KeyValueStorage, SNAPSHOT_KEY};

/// 健康检查结果
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub status: String, // "healthy" | "degraded" | "unhealthy"
    pub components: ComponentHealth,
    pub attached_ports: usize,
    pub timestamp: String,
}

/// 组件健康状态
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub storage: ComponentStatus,
    pub keep_alive: ComponentStatus,
}

/// 组件状态
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub status: String, // "ok" | "error" | "disabled"
    pub message: String,
    pub latency_ms: Option<u64>,
}

/// 执行完整健康检查
///
/// `keep_alive` 为 `None` 表示保活未启用。
pub async fn check_health(
    storage: &dyn KeyValueStorage,
    keep_alive: Option<bool>,
    attached_ports: usize,
) -> HealthCheckResult {
    let storage_status = check_storage(storage).await;
    let keep_alive_status = match keep_alive {
        Some(true) => ComponentStatus {
            status: "ok".to_string(),
            message: "Keep-alive ticking".to_string(),
            latency_ms: None,
        },
        Some(false) => ComponentStatus {
            status: "error".to_string(),
            message: "Keep-alive task stopped".to_string(),
            latency_ms: None,
        },
        None => ComponentStatus {
            status: "disabled".to_string(),
            message: "Keep-alive not enabled".to_string(),
            latency_ms: None,
        },
    };

    let status = determine_overall_status(&storage_status, &keep_alive_status);

    HealthCheckResult {
        status,
        components: ComponentHealth {
            storage: storage_status,
            keep_alive: keep_alive_status,
        },
        attached_ports,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// 检查存储可读
async fn check_storage(storage: &dyn KeyValueStorage) -> ComponentStatus {
    let start = std::time::Instant::now();

    match storage.get(SNAPSHOT_KEY).await {
        Ok(_) => ComponentStatus {
            status: "ok".to_string(),
            message: "Storage readable".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => ComponentStatus {
            status: "error".to_string(),
            message: format!("Storage error: {}", e),
            latency_ms: None,
        },
    }
}

/// 存储不可用即不健康；只有保活停止则降级
fn determine_overall_status(storage: &ComponentStatus, keep_alive: &ComponentStatus) -> String {
    if storage.status == "error" {
        "unhealthy".to_string()
    } else if keep_alive.status == "error" {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryStorage;

    #[tokio::test]
    async fn test_memory_storage_is_healthy() {
        let storage = MemoryStorage::new();
        let result = check_health(&storage, None, 2).await;
        assert_eq!(result.status, "healthy");
        assert_eq!(result.components.keep_alive.status, "disabled");
        assert_eq!(result.attached_ports, 2);
    }

    #[tokio::test]
    async fn test_stopped_keep_alive_degrades() {
        let storage = MemoryStorage::new();
        let result = check_health(&storage, Some(false), 0).await;
        assert_eq!(result.status, "degraded");
    }
}
