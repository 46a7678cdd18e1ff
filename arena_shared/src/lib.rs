//! `arena_shared`
//!
//! Shared libraries used by both the lobby server and the client.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (ecs, net, delta, input, math, config).
//! - Explicit binary wire format; serde is reserved for configuration.
//! - No `unsafe`.

pub mod config;
pub mod delta;
pub mod ecs;
pub mod input;
pub mod math;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::delta::*;
    pub use crate::ecs::*;
    pub use crate::input::*;
    pub use crate::math::*;
    pub use crate::net::*;
}
