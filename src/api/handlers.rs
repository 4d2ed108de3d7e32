use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::{
    api::response::{success_response, ApiResponse},
    app_state::AppState,
    domain::{NetworkStatus, Snapshot},
    error::AppError,
    infrastructure::health::{check_health, HealthCheckResult},
    service::polling_guard::should_block_polling,
};

pub async fn healthz(
    State(st): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<HealthCheckResult>>, AppError> {
    let result = check_health(
        st.storage.as_ref(),
        st.keep_alive_running(),
        st.replication.attached(),
    )
    .await;
    success_response(result)
}

/// 权威快照的只读副本
pub async fn get_state(
    State(st): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Snapshot>>, AppError> {
    success_response(st.hub.snapshot().await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingStatus {
    pub blocked: bool,
    pub network_status: NetworkStatus,
    pub last_login: Option<i64>,
}

/// 轮询守卫当前的判断
pub async fn get_polling(
    State(st): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<PollingStatus>>, AppError> {
    let flags = st.hub.read(|s| s.session_flags.clone()).await;
    success_response(PollingStatus {
        blocked: should_block_polling(&flags),
        network_status: flags.network_status,
        last_login: flags.last_login,
    })
}
