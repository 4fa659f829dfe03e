use std::str::FromStr;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Upgrades beyond this many live connections are refused with 503.
    pub max_connections: usize,
    /// Text frames longer than this close the connection.
    pub max_message_bytes: usize,
    /// Malformed payloads tolerated per connection before it is closed (0 = unlimited).
    pub max_parse_errors: u32,
    /// Capacity of the command channel into the relay loop.
    pub command_capacity: usize,
    /// Per-connection outbound queue; frames beyond it are dropped.
    pub outbox_capacity: usize,
    /// Accepted `Origin` headers. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
    /// Seed for connection-id generation. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            max_connections: 1024,
            max_message_bytes: 1024,
            max_parse_errors: 5,
            command_capacity: 1024,
            outbox_capacity: 64,
            allowed_origins: vec![],
            rng_seed: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("RELAY_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        override_from_env("RELAY_MAX_CONNECTIONS", &mut config.max_connections);
        override_from_env("RELAY_MAX_MESSAGE_BYTES", &mut config.max_message_bytes);
        override_from_env("RELAY_MAX_PARSE_ERRORS", &mut config.max_parse_errors);
        if let Ok(origins) = std::env::var("RELAY_ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }
        if let Ok(raw) = std::env::var("RELAY_RNG_SEED") {
            match raw.trim().parse() {
                Ok(seed) => config.rng_seed = Some(seed),
                Err(_) => tracing::warn!("Ignoring invalid RELAY_RNG_SEED={:?}", raw),
            }
        }
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.trim().is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.max_message_bytes < 64 {
            return Err("max_message_bytes must be >= 64".to_string());
        }
        if self.command_capacity == 0 {
            return Err("command_capacity must be > 0".to_string());
        }
        if self.outbox_capacity == 0 {
            return Err("outbox_capacity must be > 0".to_string());
        }
        if self.allowed_origins.iter().any(|o| o.is_empty()) {
            return Err("allowed_origins must not contain empty entries".to_string());
        }
        Ok(())
    }
}

fn override_from_env<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("Ignoring invalid {}={:?}", key, raw),
        }
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
