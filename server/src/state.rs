use crate::lobby::Lobby;
use crate::player::{generate_id, PlayerId, PlayerState, Position};
use crate::protocol::{
    ClientMsg, ErrorMsg, LobbiesMsg, LobbyWire, PlayerWire, PlayersMsg, ServerMsg, WelcomeMsg,
    ERROR_LOBBY_EXISTS, PROTOCOL_VERSION,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Reasons a client message is not applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("lobby {0:?} already exists")]
    LobbyExists(String),
    #[error("lobby {0:?} does not exist")]
    UnknownLobby(String),
}

impl RelayError {
    /// Error frame for the sender. `None` for errors that are silently ignored.
    pub fn to_client_msg(&self) -> Option<ServerMsg> {
        match self {
            RelayError::LobbyExists(_) => Some(ServerMsg::Error(ErrorMsg {
                code: ERROR_LOBBY_EXISTS.to_string(),
                message: self.to_string(),
            })),
            RelayError::UnknownPlayer(_) | RelayError::UnknownLobby(_) => None,
        }
    }
}

/// A message and the connections it is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub recipients: Vec<PlayerId>,
    pub msg: ServerMsg,
}

/// Players and lobbies, owned by the relay loop task.
///
/// Every transition returns the deliveries it causes. Recipients are
/// resolved against the state as it is after the transition.
pub struct RelayState {
    pub players: HashMap<PlayerId, PlayerState>,
    pub lobbies: HashMap<String, Lobby>,
    rng: ChaCha8Rng,
}

impl RelayState {
    pub fn new(rng_seed: Option<u64>) -> Self {
        let rng = match rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            players: HashMap::new(),
            lobbies: HashMap::new(),
            rng,
        }
    }

    /// Register a new connection and return its id.
    pub fn connect(&mut self) -> PlayerId {
        let id = loop {
            let candidate = generate_id(&mut self.rng);
            if !self.players.contains_key(&candidate) {
                break candidate;
            }
        };
        self.players.insert(id.clone(), PlayerState::new(id.clone()));
        id
    }

    /// Apply a client message sent on connection `sender`.
    pub fn handle(&mut self, sender: &str, msg: ClientMsg) -> Result<Vec<Delivery>, RelayError> {
        match msg {
            ClientMsg::Update { id, x, y, z } => {
                if let Some(claimed) = id.as_deref().filter(|claimed| *claimed != sender) {
                    tracing::debug!(
                        "Player {} sent update for {}; applying to sender",
                        sender,
                        claimed
                    );
                }
                self.update(sender, Position { x, y, z })
            }
            ClientMsg::CreateLobby { lobby_name } => self.create_lobby(sender, lobby_name),
            ClientMsg::JoinLobby { lobby_name } => self.join_lobby(sender, lobby_name),
        }
    }

    /// Overwrite the sender's position and refresh its lobby, if any.
    pub fn update(&mut self, sender: &str, position: Position) -> Result<Vec<Delivery>, RelayError> {
        let player = self
            .players
            .get_mut(sender)
            .ok_or_else(|| RelayError::UnknownPlayer(sender.to_string()))?;
        player.position = position;
        let lobby = player.lobby.clone();

        Ok(lobby
            .and_then(|name| self.players_delivery(&name))
            .into_iter()
            .collect())
    }

    /// Create a lobby with the sender as its only member.
    pub fn create_lobby(&mut self, sender: &str, name: String) -> Result<Vec<Delivery>, RelayError> {
        if !self.players.contains_key(sender) {
            return Err(RelayError::UnknownPlayer(sender.to_string()));
        }
        if self.lobbies.contains_key(&name) {
            return Err(RelayError::LobbyExists(name));
        }

        let mut deliveries = Vec::new();
        if let Some(prior) = self.leave_lobby(sender) {
            deliveries.extend(self.players_delivery(&prior));
        }

        self.lobbies
            .insert(name.clone(), Lobby::new(sender.to_string()));
        if let Some(player) = self.players.get_mut(sender) {
            player.lobby = Some(name.clone());
        }
        tracing::info!("Player {} created lobby {:?}", sender, name);

        deliveries.extend(self.directory_delivery());
        Ok(deliveries)
    }

    /// Add the sender to an existing lobby, leaving any other lobby first.
    pub fn join_lobby(&mut self, sender: &str, name: String) -> Result<Vec<Delivery>, RelayError> {
        let current = self
            .players
            .get(sender)
            .ok_or_else(|| RelayError::UnknownPlayer(sender.to_string()))?
            .lobby
            .clone();
        if !self.lobbies.contains_key(&name) {
            return Err(RelayError::UnknownLobby(name));
        }
        if current.as_deref() == Some(name.as_str()) {
            return Ok(self.players_delivery(&name).into_iter().collect());
        }

        let mut deliveries = Vec::new();
        let prior = self.leave_lobby(sender);
        if let Some(prior) = &prior {
            deliveries.extend(self.players_delivery(prior));
        }

        if let Some(lobby) = self.lobbies.get_mut(&name) {
            lobby.add(sender.to_string());
        }
        if let Some(player) = self.players.get_mut(sender) {
            player.lobby = Some(name.clone());
        }
        tracing::info!("Player {} joined lobby {:?}", sender, name);

        deliveries.extend(self.players_delivery(&name));
        if prior.is_some() {
            deliveries.extend(self.directory_delivery());
        }
        Ok(deliveries)
    }

    /// Drop a connection. Unknown ids are a no-op.
    pub fn disconnect(&mut self, id: &str) -> Vec<Delivery> {
        if !self.players.contains_key(id) {
            return Vec::new();
        }
        let lobby = self.leave_lobby(id);
        self.players.remove(id);

        let mut deliveries: Vec<Delivery> = lobby
            .and_then(|name| self.players_delivery(&name))
            .into_iter()
            .collect();
        deliveries.extend(self.directory_delivery());
        deliveries
    }

    /// Welcome frame for a freshly connected player.
    pub fn welcome(&self, id: &str) -> WelcomeMsg {
        WelcomeMsg {
            protocol_version: PROTOCOL_VERSION,
            self_id: id.to_string(),
            lobbies: self.directory(),
        }
    }

    /// Players whose current lobby is `lobby`.
    pub fn players_in(&self, lobby: &str) -> PlayersMsg {
        PlayersMsg {
            players: self
                .players
                .values()
                .filter(|p| p.in_lobby(lobby))
                .map(|p| (p.id.clone(), PlayerWire::from(p)))
                .collect(),
        }
    }

    pub fn directory(&self) -> BTreeMap<String, LobbyWire> {
        self.lobbies
            .iter()
            .map(|(name, lobby)| (name.clone(), LobbyWire::from(lobby)))
            .collect()
    }

    /// Remove `id` from its lobby, closing the lobby if it empties.
    /// Returns the lobby it left.
    fn leave_lobby(&mut self, id: &str) -> Option<String> {
        let name = self.players.get_mut(id)?.lobby.take()?;
        if let Some(lobby) = self.lobbies.get_mut(&name) {
            lobby.remove(id);
            if lobby.is_empty() {
                self.lobbies.remove(&name);
                tracing::info!("Lobby {:?} closed", name);
            }
        }
        Some(name)
    }

    fn players_delivery(&self, lobby: &str) -> Option<Delivery> {
        let msg = self.players_in(lobby);
        let recipients: Vec<PlayerId> = msg.players.keys().cloned().collect();
        if recipients.is_empty() {
            return None;
        }
        Some(Delivery {
            recipients,
            msg: ServerMsg::Players(msg),
        })
    }

    fn directory_delivery(&self) -> Option<Delivery> {
        if self.players.is_empty() {
            return None;
        }
        let mut recipients: Vec<PlayerId> = self.players.keys().cloned().collect();
        recipients.sort();
        Some(Delivery {
            recipients,
            msg: ServerMsg::Lobbies(LobbiesMsg {
                lobbies: self.directory(),
            }),
        })
    }
}
