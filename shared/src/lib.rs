//! Wire protocol shared between the lobby relay server and its clients.

pub mod protocol;
