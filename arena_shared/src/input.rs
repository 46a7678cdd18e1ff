//! Player input encoding.
//!
//! Clients sample their input devices (out of scope here) and send the
//! currently pressed actions as a bitmask. Inputs are idempotent per
//! frame; the per-client sequence number only exists to drop duplicates.

use bitflags::bitflags;

use crate::math::Vec2;

bitflags! {
    /// Currently pressed actions, one bit per action.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Buttons: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const FIRE = 1 << 4;
    }
}

impl Buttons {
    /// Movement direction encoded by the held directional bits, normalized
    /// so diagonals are not faster.
    pub fn direction(self) -> Vec2 {
        let mut d = Vec2::ZERO;
        if self.contains(Buttons::UP) {
            d.y -= 1.0;
        }
        if self.contains(Buttons::DOWN) {
            d.y += 1.0;
        }
        if self.contains(Buttons::LEFT) {
            d.x -= 1.0;
        }
        if self.contains(Buttons::RIGHT) {
            d.x += 1.0;
        }
        d.normalized_or_zero()
    }
}

/// One sampled input frame as sent by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFrame {
    /// Monotonic per-client counter; frames at or below the last applied
    /// sequence are dropped as duplicates.
    pub seq: u32,
    pub buttons: Buttons,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_direction_is_unit_length() {
        let d = (Buttons::UP | Buttons::RIGHT).direction();
        assert!((d.len() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposing_buttons_cancel() {
        let d = (Buttons::LEFT | Buttons::RIGHT).direction();
        assert_eq!(d, Vec2::ZERO);
    }
}
