//! Lobby relay server library.
//!
//! This module exposes the server components for use in tests and binaries.

pub mod config;
pub mod lobby;
pub mod player;
pub mod protocol;
pub mod relay_loop;
pub mod state;
pub mod ws;
