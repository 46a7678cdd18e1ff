//! `arena_server`
//!
//! The lobby process: one UDP socket for admission plus one independent
//! session per room. Each session owns a dedicated simulation thread and
//! a UDP socket of its own; sessions never share mutable state.

pub mod lobby;
pub mod rooms;
pub mod session;
pub mod systems;
