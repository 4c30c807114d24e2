//! WebSocket endpoints for render progress and the operational log.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};
use validator::Validate;

use beatcast_models::{ErrorKind, ProgressEvent, RenderParams};

use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Configuration for WebSocket backpressure.
const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const WS_CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Serialize and queue a message on the connection's send task.
///
/// Returns false once the client is gone.
async fn send_ws_message<T: Serialize>(
    tx: &mpsc::Sender<Message>,
    endpoint: &str,
    kind: &str,
    msg: &T,
) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to encode WebSocket message: {}", e);
            return true;
        }
    };
    match tx.try_send(Message::Text(json)) {
        Ok(()) => {
            metrics::record_ws_message_sent(endpoint, kind);
            true
        }
        Err(mpsc::error::TrySendError::Full(msg)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            let sent = tx.send(msg).await.is_ok();
            if sent {
                metrics::record_ws_message_sent(endpoint, kind);
            }
            sent
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Track one connection in the active gauge for the life of the socket.
fn track_connection(endpoint: &str) -> scopeguard::ScopeGuard<(), impl FnOnce(())> {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection(endpoint);

    scopeguard::guard((), |_| {
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

/// Split the socket and spawn a send task fed by a bounded channel.
fn spawn_sender(socket: WebSocket) -> (mpsc::Sender<Message>, SplitStream<WebSocket>, JoinHandle<()>) {
    let (mut ws_sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    (tx, receiver, send_task)
}

/// Render endpoint: one request in, progress events out.
pub async fn ws_render(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| async move {
        let _connection = track_connection("render");
        handle_render_socket(socket, state).await;
    })
}

async fn handle_render_socket(socket: WebSocket, state: AppState) {
    let (tx, mut receiver, send_task) = spawn_sender(socket);

    let params = match read_render_request(&mut receiver).await {
        Ok(params) => params,
        Err(detail) => {
            let event = ProgressEvent::error(ErrorKind::RenderFailed, Some(detail), 0.0);
            send_ws_message(&tx, "render", "error", &event).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    let mut events = state.controller.submit(params).await;
    info!(job_id = %events.job_id(), "Render job accepted over WebSocket");

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let terminal = event.is_terminal();
                let kind = event.status.as_str();
                if !send_ws_message(&tx, "render", kind, &event).await || terminal {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        debug!(job_id = %events.job_id(), "Render client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(tx);
    let _ = send_task.await;
}

/// Wait for the single request message and validate it.
async fn read_render_request(receiver: &mut SplitStream<WebSocket>) -> Result<RenderParams, String> {
    let text = match tokio::time::timeout(WS_CLIENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) | Err(_) => return Err("Expected JSON message or connection timeout".to_string()),
    };

    let params: RenderParams =
        serde_json::from_str(&text).map_err(|e| format!("Invalid request: {}", e))?;
    params
        .validate()
        .map_err(|e| format!("Invalid request: {}", e))?;
    Ok(params)
}

/// Log endpoint: recent history, then live entries until the client leaves.
pub async fn ws_logs(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| async move {
        let _connection = track_connection("logs");
        handle_logs_socket(socket, state).await;
    })
}

async fn handle_logs_socket(socket: WebSocket, state: AppState) {
    let (tx, mut receiver, send_task) = spawn_sender(socket);
    let mut subscription = state.logs.subscribe();

    let history = subscription.take_history();
    debug!(replayed = history.len(), "Log observer attached");
    for entry in &history {
        if !send_ws_message(&tx, "logs", "history", entry).await {
            drop(tx);
            let _ = send_task.await;
            return;
        }
    }

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            entry = subscription.next() => {
                let Some(entry) = entry else { break };
                if !send_ws_message(&tx, "logs", "live", &entry).await {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Log observer detached");
    drop(tx);
    let _ = send_task.await;
}
