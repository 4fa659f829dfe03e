pub use lobby_relay_shared::protocol::*;

use crate::lobby::Lobby;
use crate::player::PlayerState;

impl From<&PlayerState> for PlayerWire {
    fn from(player: &PlayerState) -> Self {
        Self {
            x: player.position.x,
            y: player.position.y,
            z: player.position.z,
            lobby: player.lobby.clone(),
        }
    }
}

impl From<&Lobby> for LobbyWire {
    fn from(lobby: &Lobby) -> Self {
        Self {
            players: lobby.members.clone(),
        }
    }
}

/// Parse a client text frame. Anything that isn't a known message is `None`.
pub fn parse_client_msg(text: &str) -> Option<ClientMsg> {
    serde_json::from_str(text).ok()
}
