//! Integration tests for the lobby relay.
//!
//! These tests start a real server instance and connect via WebSocket
//! to verify end-to-end behavior.

use futures_util::{SinkExt, StreamExt};
use lobby_relay_server::config::ServerConfig;
use lobby_relay_server::relay_loop::spawn_relay_loop;
use lobby_relay_server::ws::{router, AppState};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// Re-create minimal protocol types for testing, as a browser client sees them
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[allow(dead_code)]
enum ServerMsg {
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(rename = "protocolVersion")]
        protocol_version: u32,
        #[serde(rename = "selfId")]
        self_id: String,
        lobbies: BTreeMap<String, LobbyEntry>,
    },
    #[serde(rename = "update")]
    Players {
        players: BTreeMap<String, PlayerEntry>,
    },
    #[serde(rename = "lobby")]
    Lobbies {
        lobbies: BTreeMap<String, LobbyEntry>,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

#[derive(Debug, Deserialize)]
struct LobbyEntry {
    players: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct PlayerEntry {
    x: f64,
    y: f64,
    z: f64,
    lobby: Option<String>,
}

/// Start a test server on a random available port and return the WebSocket URL.
async fn start_test_server() -> String {
    start_test_server_with(ServerConfig::default()).await
}

async fn start_test_server_with(config: ServerConfig) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = ServerConfig {
        listen_addr: addr.to_string(),
        rng_seed: Some(12345),
        ..config
    };

    let relay_tx = spawn_relay_loop(&config);
    let app = router(AppState::new(relay_tx, &config));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{}/ws", addr)
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = connect_async(url).await.expect("Failed to connect");
    ws
}

/// Connect and consume the welcome, returning the socket and own id.
async fn join_server(url: &str) -> (Ws, String) {
    let mut ws = connect(url).await;
    match recv_msg(&mut ws).await {
        ServerMsg::Welcome { self_id, .. } => (ws, self_id),
        other => panic!("Expected Welcome, got {:?}", other),
    }
}

/// Read the next text message and parse as ServerMsg.
async fn recv_msg(ws: &mut Ws) -> ServerMsg {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text).expect("Failed to parse server message");
            }
            Some(Ok(_)) => continue, // Skip ping/pong
            Some(Err(e)) => panic!("WebSocket error: {}", e),
            None => panic!("WebSocket closed unexpectedly"),
        }
    }
}

/// Read the next text message with a timeout.
async fn recv_msg_timeout(ws: &mut Ws, timeout: Duration) -> Option<ServerMsg> {
    tokio::time::timeout(timeout, recv_msg(ws)).await.ok()
}

async fn send_json(ws: &mut Ws, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn create_lobby(ws: &mut Ws, name: &str) {
    send_json(ws, serde_json::json!({ "type": "createLobby", "lobbyName": name })).await;
}

async fn join_lobby(ws: &mut Ws, name: &str) {
    send_json(ws, serde_json::json!({ "type": "joinLobby", "lobbyName": name })).await;
}

async fn send_update(ws: &mut Ws, x: f64, y: f64, z: f64) {
    send_json(ws, serde_json::json!({ "type": "update", "x": x, "y": y, "z": z })).await;
}

/// Drain anything already queued for this client.
async fn drain(ws: &mut Ws) {
    while recv_msg_timeout(ws, Duration::from_millis(100)).await.is_some() {}
}

async fn expect_closed(ws: &mut Ws) -> bool {
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => {
                if ws.send(Message::Ping(vec![].into())).await.is_err() {
                    return true;
                }
            }
        }
    }
    false
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_connect_and_receive_welcome() {
    let url = start_test_server().await;
    let mut ws = connect(&url).await;

    match recv_msg(&mut ws).await {
        ServerMsg::Welcome {
            protocol_version,
            self_id,
            lobbies,
        } => {
            assert_eq!(protocol_version, 1);
            assert_eq!(self_id.len(), 9);
            assert!(lobbies.is_empty());
        }
        other => panic!("Expected Welcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_root_path_also_upgrades() {
    let url = start_test_server().await;
    let root = url.trim_end_matches("/ws").to_string();
    let (_ws, id) = join_server(&root).await;
    assert!(!id.is_empty());
}

#[tokio::test]
async fn test_multiple_clients_get_unique_ids() {
    let url = start_test_server().await;
    let (_ws1, id1) = join_server(&url).await;
    let (_ws2, id2) = join_server(&url).await;
    assert_ne!(id1, id2, "Each client should get a unique ID");
}

#[tokio::test]
async fn test_create_lobby_broadcasts_directory_to_all() {
    let url = start_test_server().await;
    let (mut a, id_a) = join_server(&url).await;
    let (mut b, _) = join_server(&url).await;

    create_lobby(&mut a, "red").await;

    for ws in [&mut a, &mut b] {
        match recv_msg(ws).await {
            ServerMsg::Lobbies { lobbies } => {
                assert_eq!(lobbies["red"].players, vec![id_a.clone()]);
            }
            other => panic!("Expected lobby directory, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_join_unknown_lobby_is_silent() {
    let url = start_test_server().await;
    let (mut a, _) = join_server(&url).await;
    let (mut b, _) = join_server(&url).await;

    join_lobby(&mut a, "ghost").await;

    assert!(recv_msg_timeout(&mut a, Duration::from_millis(200)).await.is_none());
    assert!(recv_msg_timeout(&mut b, Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_update_reaches_only_lobby_members() {
    let url = start_test_server().await;
    let (mut a, id_a) = join_server(&url).await;
    let (mut b, id_b) = join_server(&url).await;
    let (mut c, _) = join_server(&url).await;

    create_lobby(&mut a, "red").await;
    join_lobby(&mut b, "red").await;
    create_lobby(&mut c, "blue").await;
    drain(&mut a).await;
    drain(&mut b).await;
    drain(&mut c).await;

    send_update(&mut a, 1.0, 2.0, 3.0).await;

    for ws in [&mut a, &mut b] {
        match recv_msg(ws).await {
            ServerMsg::Players { players } => {
                assert_eq!(players.len(), 2);
                let me = &players[&id_a];
                assert_eq!((me.x, me.y, me.z), (1.0, 2.0, 3.0));
                assert_eq!(me.lobby.as_deref(), Some("red"));
                assert!(players.contains_key(&id_b));
            }
            other => panic!("Expected player list, got {:?}", other),
        }
    }
    assert!(
        recv_msg_timeout(&mut c, Duration::from_millis(200)).await.is_none(),
        "Other lobbies must not see the update"
    );
}

#[tokio::test]
async fn test_update_cannot_move_another_player() {
    let url = start_test_server().await;
    let (mut a, id_a) = join_server(&url).await;
    let (mut b, id_b) = join_server(&url).await;

    create_lobby(&mut a, "red").await;
    join_lobby(&mut b, "red").await;
    drain(&mut a).await;
    drain(&mut b).await;

    send_json(
        &mut b,
        serde_json::json!({ "type": "update", "id": id_a, "x": 9.0, "y": 9.0, "z": 9.0 }),
    )
    .await;

    match recv_msg(&mut a).await {
        ServerMsg::Players { players } => {
            assert_eq!(players[&id_a].x, 0.0);
            assert_eq!(players[&id_b].x, 9.0);
        }
        other => panic!("Expected player list, got {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_lobby_name_is_rejected() {
    let url = start_test_server().await;
    let (mut a, id_a) = join_server(&url).await;
    let (mut b, _) = join_server(&url).await;

    create_lobby(&mut a, "red").await;
    drain(&mut a).await;
    drain(&mut b).await;

    create_lobby(&mut b, "red").await;
    match recv_msg(&mut b).await {
        ServerMsg::Error { code, .. } => assert_eq!(code, "LOBBY_EXISTS"),
        other => panic!("Expected error, got {:?}", other),
    }
    assert!(recv_msg_timeout(&mut a, Duration::from_millis(200)).await.is_none());

    // A late joiner still sees the original lobby
    let mut c = connect(&url).await;
    match recv_msg(&mut c).await {
        ServerMsg::Welcome { lobbies, .. } => assert_eq!(lobbies["red"].players, vec![id_a]),
        other => panic!("Expected Welcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sole_member_disconnect_removes_lobby() {
    let url = start_test_server().await;
    let (mut a, _) = join_server(&url).await;
    let (mut b, _) = join_server(&url).await;

    create_lobby(&mut a, "blue").await;
    drain(&mut b).await;

    a.close(None).await.unwrap();

    let mut removed = false;
    for _ in 0..10 {
        if let Some(ServerMsg::Lobbies { lobbies }) =
            recv_msg_timeout(&mut b, Duration::from_millis(200)).await
        {
            if !lobbies.contains_key("blue") {
                removed = true;
                break;
            }
        }
    }
    assert!(removed, "Empty lobby should disappear from the directory");
}

#[tokio::test]
async fn test_disconnect_with_remaining_members() {
    let url = start_test_server().await;
    let (mut a, id_a) = join_server(&url).await;
    let (mut b, id_b) = join_server(&url).await;

    create_lobby(&mut a, "blue").await;
    join_lobby(&mut b, "blue").await;
    drain(&mut a).await;
    drain(&mut b).await;

    a.close(None).await.unwrap();

    match recv_msg(&mut b).await {
        ServerMsg::Players { players } => {
            assert!(!players.contains_key(&id_a));
            assert!(players.contains_key(&id_b));
        }
        other => panic!("Expected player list, got {:?}", other),
    }
    match recv_msg(&mut b).await {
        ServerMsg::Lobbies { lobbies } => {
            assert_eq!(lobbies["blue"].players, vec![id_b.clone()]);
        }
        other => panic!("Expected lobby directory, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_message_is_ignored() {
    let url = start_test_server().await;
    let (mut a, _) = join_server(&url).await;
    let (mut b, _) = join_server(&url).await;

    a.send(Message::Text("not valid json".into())).await.unwrap();
    send_json(&mut a, serde_json::json!({ "type": "update", "x": 1.0 })).await;

    assert!(recv_msg_timeout(&mut b, Duration::from_millis(200)).await.is_none());

    // The connection keeps working
    create_lobby(&mut a, "red").await;
    match recv_msg(&mut a).await {
        ServerMsg::Lobbies { lobbies } => assert!(lobbies.contains_key("red")),
        other => panic!("Expected lobby directory, got {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_message_disconnects_client() {
    let url = start_test_server().await;
    let (mut ws, _) = join_server(&url).await;

    let huge_payload = "x".repeat(2000);
    let msg = format!(
        r#"{{"type":"createLobby","lobbyName":"{}"}}"#,
        huge_payload
    );
    let _ = ws.send(Message::Text(msg.into())).await;

    assert!(
        expect_closed(&mut ws).await,
        "Client should be disconnected after oversized message"
    );
}

#[tokio::test]
async fn test_parse_spam_disconnects_client() {
    let url = start_test_server().await;
    let (mut ws, _) = join_server(&url).await;

    for _ in 0..10 {
        if ws.send(Message::Text("not valid json".into())).await.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(
        expect_closed(&mut ws).await,
        "Client should be disconnected after too many parse errors"
    );
}

#[tokio::test]
async fn test_connection_limit_rejects_upgrade() {
    let url = start_test_server_with(ServerConfig {
        max_connections: 1,
        ..Default::default()
    })
    .await;

    let (_first, _) = join_server(&url).await;
    assert!(
        connect_async(url.as_str()).await.is_err(),
        "Second connection should be refused"
    );
}
