//! `arena_client`
//!
//! Headless client: performs the lobby handshake, streams inputs to its
//! session, and maintains a replicated view of the server's world from
//! the per-tick deltas.

pub mod client;
pub mod replica;
