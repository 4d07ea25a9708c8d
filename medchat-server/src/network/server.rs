use std::future::Future;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::{get, patch},
};
use futures::{SinkExt, StreamExt};
use medchat_common::{ClientCommand, ServerEvent};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::AppState;
use super::rest;
use crate::presence::DisconnectReason;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(rest::health))
        .route(
            "/api/messages",
            get(rest::list_messages).post(rest::create_message),
        )
        .route("/api/messages/{id}/read", patch(rest::mark_read))
        .route("/api/users/{id}/unread-count", get(rest::unread_count))
        .route("/api/users/{id}/presence", get(rest::presence))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.hub;
    let (outbox, mut events) = mpsc::channel::<ServerEvent>(state.outbox_capacity);
    let (connection_id, mut kill) = hub.open_connection(outbox);
    let (mut sink, mut stream) = socket.split();

    // Drains the outbox until the hub drops its sender, then closes the socket.
    let send_timeout = state.send_timeout;
    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    log::error!("Failed to encode {} event: {err}", event.name());
                    continue;
                }
            };
            let frame = WsMessage::Text(text.into());
            match tokio::time::timeout(send_timeout, sink.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::debug!("Socket {connection_id} write failed: {err}");
                    return;
                }
                Err(_) => {
                    log::warn!("Socket {connection_id} write timed out after {send_timeout:?}");
                    return;
                }
            }
        }
        let _ = sink.close().await;
    });
    let mut writer_done = false;

    let reason = loop {
        tokio::select! {
            reason = &mut kill => {
                break reason.unwrap_or(DisconnectReason::ServerShutdown);
            }
            _ = &mut writer, if !writer_done => {
                writer_done = true;
                break DisconnectReason::ClientClosed;
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ClientCommand>(text.as_str()) {
                        Ok(ClientCommand::Disconnect) => {
                            hub.dispatch(connection_id, ClientCommand::Disconnect).await;
                            break DisconnectReason::ClientClosed;
                        }
                        Ok(command) => hub.dispatch(connection_id, command).await,
                        Err(err) => hub.reject_frame(connection_id, &err.to_string()),
                    }
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    hub.reject_frame(connection_id, "binary frames are not supported");
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                    hub.transport_heartbeat(connection_id);
                }
                Some(Ok(WsMessage::Close(_))) | None => break DisconnectReason::ClientClosed,
                Some(Err(err)) => {
                    log::debug!("Socket {connection_id} read failed: {err}");
                    break DisconnectReason::ClientClosed;
                }
            }
        }
    };

    hub.disconnect(connection_id, reason);
    if !writer_done && tokio::time::timeout(state.send_timeout, &mut writer).await.is_err() {
        writer.abort();
    }
}
