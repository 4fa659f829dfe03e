use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::protocol::{parse_client_msg, ServerMsg};
use crate::relay_loop::{Frame, RelayCommand};

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub relay_tx: mpsc::Sender<RelayCommand>,
    pub connection_semaphore: Arc<Semaphore>,
    pub max_message_bytes: usize,
    pub max_parse_errors: u32,
    pub outbox_capacity: usize,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(relay_tx: mpsc::Sender<RelayCommand>, config: &ServerConfig) -> Self {
        Self {
            relay_tx,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            max_message_bytes: config.max_message_bytes,
            max_parse_errors: config.max_parse_errors,
            outbox_capacity: config.outbox_capacity,
            allowed_origins: Arc::new(config.allowed_origins.clone()),
        }
    }
}

/// Router serving the relay on `/` and `/ws`.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// True if `origin` may connect. An empty allow-list accepts anything.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match origin {
        Some(origin) => allowed.iter().any(|a| a == origin),
        None => false,
    }
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(app_state): State<AppState>,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&app_state.allowed_origins, origin) {
        tracing::warn!("Rejected connection from origin {:?}", origin);
        return StatusCode::FORBIDDEN.into_response();
    }

    let permit = match app_state.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!("Connection limit reached, rejecting upgrade");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let max_message_bytes = app_state.max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, app_state, permit))
}

async fn handle_socket(socket: WebSocket, app_state: AppState, _permit: OwnedSemaphorePermit) {
    let (mut sink, mut stream) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<Frame>(app_state.outbox_capacity);

    // Register with the relay
    let (resp_tx, resp_rx) = oneshot::channel();
    if app_state
        .relay_tx
        .send(RelayCommand::Connect {
            outbox: outbox_tx,
            response: resp_tx,
        })
        .await
        .is_err()
    {
        tracing::error!("Failed to send Connect command");
        return;
    }

    let (my_id, welcome) = match resp_rx.await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("Failed to receive welcome");
            return;
        }
    };

    tracing::info!("Player {} connected", my_id);

    let welcome_sent = match serde_json::to_string(&ServerMsg::Welcome(welcome)) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize welcome: {}", e);
            false
        }
    };

    let mut parse_errors: u32 = 0;

    if welcome_sent {
        loop {
            tokio::select! {
                // Client -> Server
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match parse_client_msg(text.as_str()) {
                                Some(client_msg) => {
                                    let cmd = RelayCommand::Message { id: my_id.clone(), msg: client_msg };
                                    if app_state.relay_tx.send(cmd).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    parse_errors += 1;
                                    tracing::debug!("Player {} sent malformed message ({})", my_id, parse_errors);
                                    if app_state.max_parse_errors > 0 && parse_errors >= app_state.max_parse_errors {
                                        tracing::warn!("Player {} exceeded parse error limit, disconnecting", my_id);
                                        break;
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        // Includes frames over max_message_size
                        Some(Err(e)) => {
                            tracing::debug!("Player {} socket error: {}", my_id, e);
                            break;
                        }
                        _ => {} // Ignore ping/pong/binary
                    }
                }

                // Server -> Client
                frame = outbox_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if sink.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;

    // Cleanup on disconnect
    let _ = app_state
        .relay_tx
        .send(RelayCommand::Disconnect { id: my_id.clone() })
        .await;
    tracing::info!("Player {} disconnected", my_id);
}
