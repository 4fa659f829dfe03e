use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Error code sent when `createLobby` names a lobby that already exists.
pub const ERROR_LOBBY_EXISTS: &str = "LOBBY_EXISTS";

// === Server -> Client ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
#[serde(tag = "type")]
pub enum ServerMsg {
    #[serde(rename = "welcome")]
    Welcome(WelcomeMsg),
    /// Player-list snapshot for one lobby.
    #[serde(rename = "update")]
    Players(PlayersMsg),
    /// Full lobby directory.
    #[serde(rename = "lobby")]
    Lobbies(LobbiesMsg),
    #[serde(rename = "error")]
    Error(ErrorMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub protocol_version: u32,
    pub self_id: String,
    pub lobbies: BTreeMap<String, LobbyWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct PlayersMsg {
    pub players: BTreeMap<String, PlayerWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct LobbiesMsg {
    pub lobbies: BTreeMap<String, LobbyWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct PlayerWire {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub lobby: Option<String>,
}

/// Members of a lobby, in join order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct LobbyWire {
    pub players: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
pub struct ErrorMsg {
    pub code: String,
    pub message: String,
}

// === Client -> Server ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../bindings/")]
#[serde(tag = "type")]
pub enum ClientMsg {
    /// Position report. The server applies it to the sender's own player;
    /// `id` is accepted for older clients in any JSON form and otherwise
    /// ignored; only a string value is kept.
    #[serde(rename = "update")]
    Update {
        #[serde(
            default,
            deserialize_with = "string_or_none",
            skip_serializing_if = "Option::is_none"
        )]
        id: Option<String>,
        x: f64,
        y: f64,
        z: f64,
    },
    #[serde(rename = "createLobby")]
    CreateLobby {
        #[serde(rename = "lobbyName")]
        lobby_name: String,
    },
    #[serde(rename = "joinLobby")]
    JoinLobby {
        #[serde(rename = "lobbyName")]
        lobby_name: String,
    },
}

/// Keep a string, drop any other JSON value.
fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}
