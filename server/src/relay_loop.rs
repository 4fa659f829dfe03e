use crate::config::ServerConfig;
use crate::player::PlayerId;
use crate::protocol::{ClientMsg, WelcomeMsg};
use crate::state::{Delivery, RelayState};
use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// A serialized server message queued for one connection.
pub type Frame = Utf8Bytes;

/// Commands from client connections to the relay loop
pub enum RelayCommand {
    Connect {
        outbox: mpsc::Sender<Frame>,
        response: oneshot::Sender<(PlayerId, WelcomeMsg)>,
    },
    Disconnect {
        id: PlayerId,
    },
    Message {
        id: PlayerId,
        msg: ClientMsg,
    },
}

/// Spawn the relay loop for one server instance and return its command sender.
pub fn spawn_relay_loop(config: &ServerConfig) -> mpsc::Sender<RelayCommand> {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
    tokio::spawn(run_relay_loop(cmd_rx, config.rng_seed));
    cmd_tx
}

/// Run the relay. Owns all player and lobby state; ends when every
/// command sender is dropped.
pub async fn run_relay_loop(mut cmd_rx: mpsc::Receiver<RelayCommand>, rng_seed: Option<u64>) {
    let mut state = RelayState::new(rng_seed);
    let mut outboxes: HashMap<PlayerId, mpsc::Sender<Frame>> = HashMap::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            RelayCommand::Connect { outbox, response } => {
                let id = state.connect();
                let welcome = state.welcome(&id);
                if response.send((id.clone(), welcome)).is_err() {
                    // Socket went away before it could be greeted.
                    state.disconnect(&id);
                    continue;
                }
                outboxes.insert(id, outbox);
            }
            RelayCommand::Disconnect { id } => {
                outboxes.remove(&id);
                let deliveries = state.disconnect(&id);
                dispatch(&outboxes, deliveries);
                tracing::info!("Player {} left", id);
            }
            RelayCommand::Message { id, msg } => match state.handle(&id, msg) {
                Ok(deliveries) => dispatch(&outboxes, deliveries),
                Err(err) => match err.to_client_msg() {
                    Some(reply) => dispatch(
                        &outboxes,
                        vec![Delivery {
                            recipients: vec![id],
                            msg: reply,
                        }],
                    ),
                    None => tracing::debug!("Ignoring message from {}: {}", id, err),
                },
            },
        }
    }

    tracing::info!("Relay loop ended");
}

/// Serialize each delivery once and queue it on every recipient's outbox.
/// A full or closed outbox drops the frame.
fn dispatch(outboxes: &HashMap<PlayerId, mpsc::Sender<Frame>>, deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        let frame = match serde_json::to_string(&delivery.msg) {
            Ok(json) => Frame::from(json),
            Err(e) => {
                tracing::error!("Failed to serialize {:?}: {}", delivery.msg, e);
                continue;
            }
        };

        for id in &delivery.recipients {
            let Some(outbox) = outboxes.get(id) else {
                continue;
            };
            match outbox.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Player {} outbox full, dropping frame", id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("Player {} outbox closed", id);
                }
            }
        }
    }
}
