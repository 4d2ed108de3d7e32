//! 后台轮询器
//!
//! 每个周期先问轮询守卫，允许时才执行任务。任务失败只记日志。

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::interval};

use crate::{
    service::{polling_guard::should_block_polling_now, state_hub::StateHub},
    utils::time_utils::Clock,
};

/// 轮询任务（余额、网络状态等由外部客户端实现）
#[async_trait]
pub trait PollTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn poll(&self, hub: &StateHub) -> anyhow::Result<()>;
}

/// 后台轮询器
pub struct BackgroundPoller {
    hub: Arc<StateHub>,
    task: Arc<dyn PollTask>,
    period: Duration,
}

impl BackgroundPoller {
    pub fn new(hub: Arc<StateHub>, task: Arc<dyn PollTask>, period: Duration) -> Self {
        Self { hub, task, period }
    }

    /// 执行一个周期，返回是否真正执行了任务
    pub async fn tick(&self) -> bool {
        if should_block_polling_now(&self.hub).await {
            tracing::debug!(task = self.task.name(), "Polling blocked by session state");
            return false;
        }

        if let Err(e) = self.task.poll(&self.hub).await {
            tracing::warn!(task = self.task.name(), error = ?e, "Poll task failed");
        }
        true
    }

    /// 启动后台循环；abort 返回的句柄即可取消
    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(
            task = self.task.name(),
            interval_secs = self.period.as_secs(),
            "Background poller started"
        );

        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}

/// 价格缓存过期检查
///
/// 价格拉取由外部客户端负责；这里只在缓存（`updatedAt`，毫秒）过期时告警。
pub struct PriceStalenessCheck {
    clock: Arc<dyn Clock>,
    max_age: Duration,
}

impl PriceStalenessCheck {
    pub fn new(clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self { clock, max_age }
    }

    /// 缓存是否过期；从未拉取过不算过期
    pub fn is_stale(&self, updated_at_ms: Option<i64>) -> bool {
        let Some(updated_at) = updated_at_ms else {
            return false;
        };
        let max_age_ms = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        self.clock.now_ms().saturating_sub(updated_at) > max_age_ms
    }
}

#[async_trait]
impl PollTask for PriceStalenessCheck {
    fn name(&self) -> &'static str {
        "price_staleness"
    }

    async fn poll(&self, hub: &StateHub) -> anyhow::Result<()> {
        let (updated_at, quotes) = hub
            .read(|s| (s.price.updated_at, s.price.quotes.len()))
            .await;
        if self.is_stale(updated_at) {
            tracing::warn!(updated_at = ?updated_at, quotes, "Price quotes are stale");
        }
        Ok(())
    }
}
