//! IronKeeper 主入口
//! 钱包扩展的特权后台进程

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use ironkeeper::{
    api,
    app_state::AppState,
    config::Config,
    infrastructure::{
        keep_alive::{HeartbeatFileLiveness, KeepAliveSupervisor, LivenessHint, NoopLiveness},
        logging::init_logging,
    },
    service::{
        background_poller::{BackgroundPoller, PriceStalenessCheck},
        keyring::{InMemoryKeyring, Keyring},
    },
    utils::time_utils::SystemClock,
};
use sha2::{Digest, Sha256};

#[tokio::main]
async fn main() -> Result<()> {
    // ✅ 1. 加载环境变量
    dotenvy::dotenv().ok();

    // ✅ 2. 加载配置（CONFIG_PATH 指向的 TOML 优先）
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    config.validate()?;
    let config = Arc::new(config);

    // ✅ 3. 初始化日志（guard 持有到进程退出）
    let _log_guard = init_logging(&config.logging).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tracing::info!("🚀 Starting IronKeeper background process");

    // ✅ 4. 密钥环（真实实现由外部注入；开发环境可用口令构造内存密钥环）
    let keyring: Arc<dyn Keyring> = match std::env::var("KEYRING_DEV_PASSWORD") {
        Ok(password) if !password.is_empty() => {
            tracing::warn!("⚠️ Using in-memory development keyring");
            let seed = Sha256::digest(password.as_bytes()).to_vec();
            Arc::new(InMemoryKeyring::new(&password, seed))
        }
        _ => Arc::new(InMemoryKeyring::empty()),
    };

    // ✅ 5. 迁移、恢复快照、组装后台组件
    let state = Arc::new(AppState::from_config(config.clone(), keyring).await?);

    // ✅ 6. 保活
    if config.keep_alive.enabled {
        let hint: Arc<dyn LivenessHint> = match &config.keep_alive.heartbeat_file {
            Some(path) => Arc::new(HeartbeatFileLiveness::new(path)),
            None => Arc::new(NoopLiveness),
        };
        let supervisor = KeepAliveSupervisor::new(
            hint,
            Duration::from_millis(config.keep_alive.interval_ms),
        );
        state.set_keep_alive(supervisor.start());
    }

    // ✅ 7. 后台轮询
    let polling_period = Duration::from_secs(config.polling.interval_secs);
    let poller = BackgroundPoller::new(
        state.hub.clone(),
        Arc::new(PriceStalenessCheck::new(
            Arc::new(SystemClock),
            polling_period * 4,
        )),
        polling_period,
    )
    .start();

    // ✅ 8. 启动服务器
    let app = api::routes(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("🎉 Listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poller.abort();
    state.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
