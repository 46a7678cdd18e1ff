//! Per-tick change-set (the snapshot delta).
//!
//! Systems tag their own mutations as they make them, so no full-state
//! diffing pass is needed. The accumulated delta is serialized once per
//! tick and then discarded.

use crate::{ecs::Entity, math::Vec2};

/// Spawn template tag carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archetype {
    Player = 1,
    Projectile = 2,
}

impl Archetype {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Archetype::Player),
            2 => Some(Archetype::Projectile),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Identifies which component a modification record refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentTag {
    Position = 1,
    Velocity = 2,
    Health = 3,
}

impl ComponentTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ComponentTag::Position),
            2 => Some(ComponentTag::Velocity),
            3 => Some(ComponentTag::Health),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One entity creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnRecord {
    pub entity: Entity,
    pub archetype: Archetype,
    pub x: f32,
    pub y: f32,
}

/// One component modification. Every tagged component flattens to two
/// floats on the wire (x/y, dx/dy, or current/max).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRecord {
    pub entity: Entity,
    pub tag: ComponentTag,
    pub a: f32,
    pub b: f32,
}

/// Everything that changed during one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickDelta {
    pub spawns: Vec<SpawnRecord>,
    pub destroys: Vec<Entity>,
    pub updates: Vec<UpdateRecord>,
}

impl TickDelta {
    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.destroys.is_empty() && self.updates.is_empty()
    }

    pub fn only_spawns(&self) -> bool {
        !self.spawns.is_empty() && self.destroys.is_empty() && self.updates.is_empty()
    }

    pub fn only_destroys(&self) -> bool {
        self.spawns.is_empty() && !self.destroys.is_empty() && self.updates.is_empty()
    }
}

/// Rollback point inside a [`DeltaRecorder`], taken before a system runs.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    spawns: usize,
    destroys: usize,
    updates: usize,
}

/// Accumulates the change-set for the tick in progress.
#[derive(Default)]
pub struct DeltaRecorder {
    delta: TickDelta,
}

impl DeltaRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_spawn(&mut self, entity: Entity, archetype: Archetype, pos: Vec2) {
        self.delta.spawns.push(SpawnRecord {
            entity,
            archetype,
            x: pos.x,
            y: pos.y,
        });
    }

    pub fn record_destroy(&mut self, entity: Entity) {
        self.delta.destroys.push(entity);
    }

    pub fn record_update(&mut self, entity: Entity, tag: ComponentTag, a: f32, b: f32) {
        self.delta.updates.push(UpdateRecord { entity, tag, a, b });
    }

    /// Marks the recorder state before a system runs.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            spawns: self.delta.spawns.len(),
            destroys: self.delta.destroys.len(),
            updates: self.delta.updates.len(),
        }
    }

    /// Discards everything recorded after `mark`. Used to void a faulting
    /// system's contribution for the tick.
    pub fn rollback(&mut self, mark: Checkpoint) {
        self.delta.spawns.truncate(mark.spawns);
        self.delta.destroys.truncate(mark.destroys);
        self.delta.updates.truncate(mark.updates);
    }

    pub fn delta(&self) -> &TickDelta {
        &self.delta
    }

    /// Hands out the finished delta and resets for the next tick.
    pub fn take(&mut self) -> TickDelta {
        std::mem::take(&mut self.delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_discards_later_records() {
        let mut rec = DeltaRecorder::new();
        rec.record_spawn(Entity(1), Archetype::Player, Vec2::ZERO);

        let mark = rec.checkpoint();
        rec.record_destroy(Entity(1));
        rec.record_update(Entity(1), ComponentTag::Position, 1.0, 2.0);
        rec.rollback(mark);

        let delta = rec.take();
        assert_eq!(delta.spawns.len(), 1);
        assert!(delta.destroys.is_empty());
        assert!(delta.updates.is_empty());
    }

    #[test]
    fn take_resets_the_recorder() {
        let mut rec = DeltaRecorder::new();
        rec.record_destroy(Entity(7));
        assert!(!rec.take().is_empty());
        assert!(rec.take().is_empty());
    }
}
