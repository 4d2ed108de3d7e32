//! DApp 会话 API
//!
//! 注入脚本侧的连接、断开与账户切换请求。账户切换会一直挂起，
//! 直到用户在确认弹窗里确认、关闭弹窗或超时。

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::response::{success_response, ApiResponse},
    app_state::AppState,
    domain::{AccountId, Origin},
    error::AppError,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub origin: Origin,
    #[serde(default)]
    pub accounts: Vec<AccountId>,
}

#[derive(Debug, Deserialize)]
pub struct OriginRequest {
    pub origin: Origin,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DappStatus {
    pub origin: Origin,
    pub connected: bool,
    pub permitted_accounts: Vec<AccountId>,
    pub has_open_popup: bool,
    pub pending: bool,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub disconnected: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountChangeResponse {
    pub approved: bool,
}

fn require_origin(origin: &str) -> Result<(), AppError> {
    if origin.trim().is_empty() {
        return Err(AppError::bad_request("origin is required"));
    }
    Ok(())
}

async fn status_of(st: &AppState, origin: &str) -> DappStatus {
    let connection = st
        .hub
        .read(|s| s.dapp.connections.get(origin).cloned())
        .await;
    DappStatus {
        origin: origin.to_string(),
        connected: connection.is_some(),
        permitted_accounts: connection
            .as_ref()
            .map(|c| c.permitted_accounts.iter().cloned().collect())
            .unwrap_or_default(),
        has_open_popup: connection.map(|c| c.has_open_popup).unwrap_or(false),
        pending: st.dapps.has_pending(origin),
    }
}

pub async fn connect(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ApiResponse<DappStatus>>, AppError> {
    require_origin(&req.origin)?;
    st.dapps.connect(&req.origin, req.accounts).await?;
    success_response(status_of(&st, &req.origin).await)
}

pub async fn disconnect(
    State(st): State<Arc<AppState>>,
    Json(req): Json<OriginRequest>,
) -> Result<Json<ApiResponse<DisconnectResponse>>, AppError> {
    require_origin(&req.origin)?;
    let disconnected = st.dapps.disconnect(&req.origin).await?;
    success_response(DisconnectResponse { disconnected })
}

/// 挂起直到请求被结算
pub async fn request_account_change(
    State(st): State<Arc<AppState>>,
    Json(req): Json<OriginRequest>,
) -> Result<Json<ApiResponse<AccountChangeResponse>>, AppError> {
    require_origin(&req.origin)?;
    let approved = st.dapps.request_account_change(&req.origin).await;
    success_response(AccountChangeResponse { approved })
}

pub async fn status(
    State(st): State<Arc<AppState>>,
    Query(req): Query<OriginRequest>,
) -> Result<Json<ApiResponse<DappStatus>>, AppError> {
    require_origin(&req.origin)?;
    success_response(status_of(&st, &req.origin).await)
}
