//! Load test for the lobby relay.
//!
//! Spawns multiple fake WebSocket clients that:
//! - Connect to the server and wait for the welcome
//! - Create or join a lobby (groups of `--lobby-size` clients)
//! - Periodically send position updates
//! - Receive and count player-list and directory broadcasts
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]
//!
//! Options:
//!   --clients N      Number of clients to spawn (default: 100)
//!   --duration S     Test duration in seconds (default: 30)
//!   --update-rate R  Position updates per second per client (default: 10)
//!   --lobby-size K   Clients per lobby (default: 8)
//!   --url URL        Server URL (default: ws://127.0.0.1:8080/ws)

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

// === Protocol types (minimal subset) ===

#[derive(Serialize)]
#[serde(tag = "type")]
enum ClientMsg {
    #[serde(rename = "update")]
    Update { x: f64, y: f64, z: f64 },
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

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ServerMsg {
    #[serde(rename = "welcome")]
    Welcome {},
    #[serde(rename = "update")]
    Players {
        players: serde_json::Map<String, serde_json::Value>,
    },
    #[serde(rename = "lobby")]
    Lobbies {},
    #[serde(rename = "error")]
    Error {},
}

// === Metrics ===

struct Metrics {
    connected: AtomicU64,
    messages_received: AtomicU64,
    player_lists_received: AtomicU64,
    directories_received: AtomicU64,
    updates_sent: AtomicU64,
    errors: AtomicU64,
    total_players_seen: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            connected: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            player_lists_received: AtomicU64::new(0),
            directories_received: AtomicU64::new(0),
            updates_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_players_seen: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }
}

struct ClientPlan {
    client_id: u32,
    url: String,
    lobby_name: String,
    founder: bool,
    update_rate: f64,
    duration: Duration,
}

fn to_text<T: Serialize>(msg: &T) -> Option<Message> {
    serde_json::to_string(msg)
        .ok()
        .map(|json| Message::Text(json.into()))
}

// === Client task ===

async fn run_client(plan: ClientPlan, metrics: Arc<Metrics>) {
    let client_id = plan.client_id;
    let connect_start = Instant::now();

    let (mut ws, _) = match connect_async(&plan.url).await {
        Ok(conn) => conn,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let connect_latency = connect_start.elapsed();
    metrics
        .latency_sum_ms
        .fetch_add(connect_latency.as_millis() as u64, Ordering::Relaxed);
    metrics.latency_count.fetch_add(1, Ordering::Relaxed);
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    // Wait for welcome message before doing anything else
    let got_welcome = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    if matches!(serde_json::from_str::<ServerMsg>(&text), Ok(ServerMsg::Welcome {})) {
                        return true;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => return false,
                _ => {}
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !got_welcome {
        if client_id < 3 {
            eprintln!("Client {} never got a welcome", client_id);
        }
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        metrics.connected.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    // Founders create their lobby; everyone else joins once it likely exists
    let lobby_msg = if plan.founder {
        ClientMsg::CreateLobby {
            lobby_name: plan.lobby_name.clone(),
        }
    } else {
        tokio::time::sleep(Duration::from_millis(500)).await;
        ClientMsg::JoinLobby {
            lobby_name: plan.lobby_name.clone(),
        }
    };
    let sent = match to_text(&lobby_msg) {
        Some(frame) => ws.send(frame).await.is_ok(),
        None => false,
    };
    if !sent {
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        metrics.connected.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let update_interval = if plan.update_rate > 0.0 {
        Duration::from_secs_f64(1.0 / plan.update_rate)
    } else {
        Duration::from_secs(3600) // Effectively never
    };

    let mut update_timer = tokio::time::interval(update_interval);
    update_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let test_end = Instant::now() + plan.duration;
    let mut t: f64 = client_id as f64;

    loop {
        if Instant::now() >= test_end {
            break;
        }

        tokio::select! {
            _ = update_timer.tick() => {
                t += 0.1;
                let update = ClientMsg::Update { x: t.cos() * 10.0, y: 0.0, z: t.sin() * 10.0 };
                let sent = match to_text(&update) {
                    Some(frame) => ws.send(frame).await.is_ok(),
                    None => false,
                };
                if sent {
                    metrics.updates_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        match serde_json::from_str::<ServerMsg>(&text) {
                            Ok(ServerMsg::Players { players }) => {
                                metrics.player_lists_received.fetch_add(1, Ordering::Relaxed);
                                metrics.total_players_seen.fetch_add(players.len() as u64, Ordering::Relaxed);
                            }
                            Ok(ServerMsg::Lobbies {}) => {
                                metrics.directories_received.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(ServerMsg::Error {}) => {
                                metrics.errors.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(ServerMsg::Welcome {}) | Err(_) => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        if client_id < 3 {
                            eprintln!("Client {} error: {}", client_id, e);
                        }
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws.close(None).await;
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

// === Main ===

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut num_clients: u32 = 100;
    let mut duration_secs: u64 = 30;
    let mut update_rate: f64 = 10.0;
    let mut lobby_size: u32 = 8;
    let mut url = "ws://127.0.0.1:8080/ws".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--clients" => {
                i += 1;
                num_clients = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(100);
            }
            "--duration" => {
                i += 1;
                duration_secs = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(30);
            }
            "--update-rate" => {
                i += 1;
                update_rate = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(10.0);
            }
            "--lobby-size" => {
                i += 1;
                lobby_size = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8)
                    .max(1);
            }
            "--url" => {
                i += 1;
                url = args.get(i).cloned().unwrap_or(url);
            }
            _ => {}
        }
        i += 1;
    }

    println!("=== Lobby Relay Load Test ===");
    println!("Clients: {}", num_clients);
    println!("Duration: {}s", duration_secs);
    println!("Update rate: {}/s per client", update_rate);
    println!("Lobby size: {}", lobby_size);
    println!("URL: {}", url);
    println!();

    let metrics = Arc::new(Metrics::new());
    let duration = Duration::from_secs(duration_secs);

    let mut handles = Vec::with_capacity(num_clients as usize);

    println!("Spawning {} clients...", num_clients);
    let spawn_start = Instant::now();

    for client_id in 0..num_clients {
        let plan = ClientPlan {
            client_id,
            url: url.clone(),
            lobby_name: format!("load-{}", client_id / lobby_size),
            founder: client_id % lobby_size == 0,
            update_rate,
            duration,
        };
        let metrics = Arc::clone(&metrics);

        handles.push(tokio::spawn(run_client(plan, metrics)));

        // Stagger spawns slightly to avoid thundering herd
        if client_id % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    println!("All clients spawned in {:?}", spawn_start.elapsed());
    println!();

    // Print stats periodically
    let metrics_clone = Arc::clone(&metrics);
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let start = Instant::now();

        loop {
            interval.tick().await;
            let elapsed = start.elapsed().as_secs();
            if elapsed >= duration_secs + 5 {
                break;
            }

            println!(
                "[{:3}s] connected={}, msgs={}, player_lists={}, directories={}, updates={}, errors={}",
                elapsed,
                metrics_clone.connected.load(Ordering::Relaxed),
                metrics_clone.messages_received.load(Ordering::Relaxed),
                metrics_clone.player_lists_received.load(Ordering::Relaxed),
                metrics_clone.directories_received.load(Ordering::Relaxed),
                metrics_clone.updates_sent.load(Ordering::Relaxed),
                metrics_clone.errors.load(Ordering::Relaxed),
            );
        }
    });

    // Wait for all clients to finish
    for handle in handles {
        let _ = handle.await;
    }

    stats_handle.abort();

    // Final stats
    println!();
    println!("=== Final Results ===");
    let msgs = metrics.messages_received.load(Ordering::Relaxed);
    let player_lists = metrics.player_lists_received.load(Ordering::Relaxed);
    let directories = metrics.directories_received.load(Ordering::Relaxed);
    let updates = metrics.updates_sent.load(Ordering::Relaxed);
    let errors = metrics.errors.load(Ordering::Relaxed);
    let players_seen = metrics.total_players_seen.load(Ordering::Relaxed);
    let latency_sum = metrics.latency_sum_ms.load(Ordering::Relaxed);
    let latency_count = metrics.latency_count.load(Ordering::Relaxed);

    println!("Total messages received: {}", msgs);
    println!("Total player lists: {}", player_lists);
    println!("Total directories: {}", directories);
    println!("Total updates sent: {}", updates);
    println!("Total errors: {}", errors);
    println!(
        "Average lobby size seen: {}",
        if player_lists > 0 {
            players_seen / player_lists
        } else {
            0
        }
    );

    if latency_count > 0 {
        println!("Average connect latency: {}ms", latency_sum / latency_count);
    }

    // Each update fans out to every member of the sender's lobby
    let expected = updates as f64 * lobby_size.min(num_clients.max(1)) as f64;
    println!();
    println!("Messages/sec (total): {:.0}", msgs as f64 / duration_secs.max(1) as f64);
    if expected > 0.0 {
        println!(
            "Player-list delivery rate: {:.1}%",
            player_lists as f64 / expected * 100.0
        );
    }
}
