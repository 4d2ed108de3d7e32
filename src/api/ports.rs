//! UI 端口（WebSocket）
//!
//! 每个连接即一个 UI 端：首帧是完整快照，之后是复制推送与广播通知；
//! 入站帧只能是 [`UiIntent`]。

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast::error::RecvError, mpsc};

use crate::{
    app_state::AppState,
    domain::UiIntent,
    service::replication::PortHandle,
};

/// 发往 UI 端的帧
enum Outbound {
    Json(serde_json::Value),
    Pong(Vec<u8>),
}

/// WebSocket 升级入口
pub async fn port_handler(
    ws: WebSocketUpgrade,
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_port(socket, name, state))
}

async fn handle_port(socket: WebSocket, name: String, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // 先订阅通知再接入，接入后的通知不会丢
    let mut notifications = state.bus.subscribe();
    let PortHandle {
        id,
        receiver: mut port_rx,
    } = state.replication.attach_to(&state.hub, name.clone()).await;

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(64);

    let send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(msg) = port_rx.recv() => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode state push");
                        continue;
                    }
                },
                notification = notifications.recv() => match notification {
                    Ok(n) => Message::Text(n.to_message().to_string()),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "UI port lagged behind notifications");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(out) = outbound_rx.recv() => match out {
                    Outbound::Json(value) => Message::Text(value.to_string()),
                    Outbound::Pong(data) => Message::Pong(data),
                },
                else => break,
            };

            if ws_tx.send(frame).await.is_err() {
                tracing::debug!("UI port send failed, surface detached");
                break;
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(Outbound::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(port = %name, error = %e, "UI port error");
                break;
            }
        };

        let intent: UiIntent = match serde_json::from_str(&text) {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(port = %name, error = %e, "Unparseable intent");
                let _ = outbound_tx
                    .send(Outbound::Json(json!({
                        "type": "error",
                        "code": "parse_error",
                        "message": e.to_string(),
                    })))
                    .await;
                continue;
            }
        };

        // 输入事件量大，不回执
        let quiet = matches!(intent, UiIntent::Activity { .. });
        let reply = match state.intents.dispatch(intent).await {
            Ok(_) if quiet => None,
            Ok(ok) => Some(json!({ "type": "intent_result", "ok": ok })),
            Err(e) => {
                tracing::warn!(port = %name, error = %e, "Intent failed");
                Some(json!({
                    "type": "error",
                    "code": "intent_failed",
                    "message": e.to_string(),
                }))
            }
        };
        if let Some(reply) = reply {
            let _ = outbound_tx.send(Outbound::Json(reply)).await;
        }
    }

    state.replication.detach(id);
    send_task.abort();
}
