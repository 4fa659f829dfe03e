use rand::Rng;

/// Length of a connection id.
pub const ID_LEN: usize = 9;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub type PlayerId = String;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Per-connection state held by the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: PlayerId,
    pub position: Position,
    /// Lobby the player is currently in, if any.
    pub lobby: Option<String>,
}

impl PlayerState {
    /// A freshly connected player: at the origin, in no lobby.
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            position: Position::default(),
            lobby: None,
        }
    }

    pub fn in_lobby(&self, name: &str) -> bool {
        self.lobby.as_deref() == Some(name)
    }
}

/// Random base-36 connection id.
pub fn generate_id<R: Rng + ?Sized>(rng: &mut R) -> PlayerId {
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}
