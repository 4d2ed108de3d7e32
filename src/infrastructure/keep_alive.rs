//! 保活监督器
//!
//! 宿主平台会挂起空闲的特权进程。启动时创建一个轻量的保活上下文，
//! 之后按固定短周期心跳 touch 它。创建是即发即忘的：已存在或被平台拒绝
//! 都只记一条日志，保活只是提示，不是正确性依赖。

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::interval};

use crate::error::LivenessError;

/// 保活提示接口
///
/// 没有挂起模型的运行时用 [`NoopLiveness`]。
#[async_trait]
pub trait LivenessHint: Send + Sync {
    /// 创建保活上下文
    async fn create(&self) -> Result<(), LivenessError>;

    /// 心跳
    async fn touch(&self);
}

/// 空实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLiveness;

#[async_trait]
impl LivenessHint for NoopLiveness {
    async fn create(&self) -> Result<(), LivenessError> {
        Ok(())
    }

    async fn touch(&self) {}
}

/// 心跳文件：外部守护进程通过文件修改时间判断进程是否存活
#[derive(Debug, Clone)]
pub struct HeartbeatFileLiveness {
    path: PathBuf,
}

impl HeartbeatFileLiveness {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LivenessHint for HeartbeatFileLiveness {
    async fn create(&self) -> Result<(), LivenessError> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Err(LivenessError::AlreadyExists);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LivenessError::Refused(e.to_string()))?;
        }
        tokio::fs::write(&self.path, b"")
            .await
            .map_err(|e| LivenessError::Refused(e.to_string()))
    }

    async fn touch(&self) {
        let stamp = chrono::Utc::now().to_rfc3339();
        if let Err(e) = tokio::fs::write(&self.path, stamp).await {
            tracing::debug!(path = %self.path.display(), error = %e, "Heartbeat touch failed");
        }
    }
}

/// 心跳句柄，drop 或 stop 时取消定时任务
pub struct KeepAliveHandle {
    task: JoinHandle<()>,
}

impl KeepAliveHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for KeepAliveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 保活监督器
pub struct KeepAliveSupervisor {
    hint: Arc<dyn LivenessHint>,
    period: Duration,
}

impl KeepAliveSupervisor {
    pub fn new(hint: Arc<dyn LivenessHint>, period: Duration) -> Self {
        Self { hint, period }
    }

    /// 创建保活上下文并启动心跳
    pub fn start(&self) -> KeepAliveHandle {
        let hint = self.hint.clone();
        let period = self.period;

        let task = tokio::spawn(async move {
            match hint.create().await {
                Ok(()) => tracing::info!("✅ Keep-alive context created"),
                Err(LivenessError::AlreadyExists) => {
                    tracing::debug!("Keep-alive context already exists, reusing")
                }
                Err(e) => tracing::warn!(error = %e, "Keep-alive context unavailable, continuing without it"),
            }

            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                hint.touch().await;
            }
        });

        tracing::info!(interval_ms = period.as_millis() as u64, "Keep-alive heartbeat started");
        KeepAliveHandle { task }
    }
}
