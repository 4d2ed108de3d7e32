use std::sync::Arc;

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{from_fn, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::app_state::AppState;

pub mod dapp_api; // DApp 连接与账户切换
pub mod handlers;
pub mod ports; // UI 端口 WebSocket
pub mod response; // 统一响应格式

/// 本地控制接口与 UI 端口
///
/// 不挂 CORS：只有扩展自身的页面可以调用，普通网页的跨域请求被浏览器拦截。
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/state", get(handlers::get_state))
        .route("/api/polling", get(handlers::get_polling))
        .route("/api/dapp/connect", post(dapp_api::connect))
        .route("/api/dapp/disconnect", post(dapp_api::disconnect))
        .route(
            "/api/dapp/account-change",
            post(dapp_api::request_account_change),
        )
        .route("/api/dapp/status", get(dapp_api::status))
        .route("/ports/:name", get(ports::port_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(trace_id_middleware)),
        )
        .with_state(state)
}

/// 为每个请求生成或沿用 `X-Trace-Id`，写入响应头
async fn trace_id_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get("X-Trace-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(trace_id.clone());
    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", value);
    }
    response
}
