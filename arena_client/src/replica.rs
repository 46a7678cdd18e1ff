//! Replicated world view.
//!
//! The replica is a pure function of the packets applied to it. Packets
//! arrive over UDP and may be reordered or lost; a state packet whose
//! tick is at or below the last applied tick is discarded whole, so the
//! view only ever moves forward. Updates for entities the replica has
//! never seen spawn are dropped silently; the next spawn or baseline
//! resyncs them.

use std::collections::HashMap;

use arena_shared::{
    delta::{Archetype, ComponentTag, TickDelta},
    ecs::Entity,
    math::Vec2,
    net::ServerPacket,
};

/// One replicated entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicaEntity {
    pub archetype: Archetype,
    pub position: Vec2,
    pub velocity: Vec2,
    /// `(current, max)` once a health update has been seen.
    pub health: Option<(f32, f32)>,
}

/// Client-side mirror of the session world.
#[derive(Debug, Default)]
pub struct Replica {
    entities: HashMap<Entity, ReplicaEntity>,
    last_applied: Option<u32>,
    pub avatar: Option<Entity>,
    pub game_over: bool,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one server packet. Returns `false` for stale state packets.
    pub fn apply(&mut self, packet: &ServerPacket) -> bool {
        match packet {
            ServerPacket::Welcome { avatar, .. } => {
                // The baseline that follows carries the same tick, so the
                // welcome itself does not advance the applied-tick mark.
                self.avatar = Some(*avatar);
                true
            }
            ServerPacket::GameOver { .. } => {
                self.game_over = true;
                true
            }
            ServerPacket::State { tick, delta } => {
                if self.last_applied.is_some_and(|last| *tick <= last) {
                    return false;
                }
                self.apply_delta(delta);
                self.last_applied = Some(*tick);
                true
            }
        }
    }

    fn apply_delta(&mut self, delta: &TickDelta) {
        for spawn in &delta.spawns {
            self.entities.insert(
                spawn.entity,
                ReplicaEntity {
                    archetype: spawn.archetype,
                    position: Vec2::new(spawn.x, spawn.y),
                    velocity: Vec2::ZERO,
                    health: None,
                },
            );
        }
        for destroy in &delta.destroys {
            self.entities.remove(destroy);
            if self.avatar == Some(*destroy) {
                self.avatar = None;
            }
        }
        for update in &delta.updates {
            let Some(entity) = self.entities.get_mut(&update.entity) else {
                continue;
            };
            match update.tag {
                ComponentTag::Position => entity.position = Vec2::new(update.a, update.b),
                ComponentTag::Velocity => entity.velocity = Vec2::new(update.a, update.b),
                ComponentTag::Health => entity.health = Some((update.a, update.b)),
            }
        }
    }

    pub fn get(&self, entity: Entity) -> Option<&ReplicaEntity> {
        self.entities.get(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = (Entity, &ReplicaEntity)> {
        self.entities.iter().map(|(e, r)| (*e, r))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn last_applied(&self) -> Option<u32> {
        self.last_applied
    }

    /// Counts replicated entities of one archetype.
    pub fn count(&self, archetype: Archetype) -> usize {
        self.entities
            .values()
            .filter(|r| r.archetype == archetype)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::delta::{SpawnRecord, UpdateRecord};

    fn spawn(entity: u32, x: f32, y: f32) -> SpawnRecord {
        SpawnRecord {
            entity: Entity(entity),
            archetype: Archetype::Player,
            x,
            y,
        }
    }

    fn state(tick: u32, delta: TickDelta) -> ServerPacket {
        ServerPacket::State { tick, delta }
    }

    #[test]
    fn spawns_then_updates_build_the_view() {
        let mut replica = Replica::new();
        assert!(replica.apply(&state(
            1,
            TickDelta {
                spawns: vec![spawn(1, 10.0, 20.0)],
                ..TickDelta::default()
            },
        )));
        assert!(replica.apply(&state(
            2,
            TickDelta {
                updates: vec![UpdateRecord {
                    entity: Entity(1),
                    tag: ComponentTag::Position,
                    a: 11.0,
                    b: 21.0,
                }],
                ..TickDelta::default()
            },
        )));
        assert_eq!(replica.get(Entity(1)).unwrap().position, Vec2::new(11.0, 21.0));
        assert_eq!(replica.last_applied(), Some(2));
    }

    #[test]
    fn stale_and_duplicate_packets_are_discarded_whole() {
        let mut replica = Replica::new();
        replica.apply(&state(
            5,
            TickDelta {
                spawns: vec![spawn(1, 10.0, 20.0)],
                ..TickDelta::default()
            },
        ));

        // A reordered older packet must not touch anything it carries.
        let stale = state(
            4,
            TickDelta {
                updates: vec![UpdateRecord {
                    entity: Entity(1),
                    tag: ComponentTag::Position,
                    a: 99.0,
                    b: 99.0,
                }],
                destroys: vec![Entity(1)],
                ..TickDelta::default()
            },
        );
        assert!(!replica.apply(&stale));
        assert_eq!(replica.get(Entity(1)).unwrap().position, Vec2::new(10.0, 20.0));

        let duplicate = state(5, TickDelta::default());
        assert!(!replica.apply(&duplicate));
    }

    #[test]
    fn destroy_removes_the_entity_and_clears_the_avatar() {
        let mut replica = Replica::new();
        replica.apply(&ServerPacket::Welcome {
            tick: 1,
            avatar: Entity(1),
        });
        replica.apply(&state(
            1,
            TickDelta {
                spawns: vec![spawn(1, 0.0, 0.0)],
                ..TickDelta::default()
            },
        ));
        replica.apply(&state(
            2,
            TickDelta {
                destroys: vec![Entity(1)],
                ..TickDelta::default()
            },
        ));
        assert!(replica.is_empty());
        assert_eq!(replica.avatar, None);
    }

    #[test]
    fn update_for_unknown_entity_is_dropped() {
        let mut replica = Replica::new();
        assert!(replica.apply(&state(
            1,
            TickDelta {
                updates: vec![UpdateRecord {
                    entity: Entity(42),
                    tag: ComponentTag::Health,
                    a: 50.0,
                    b: 100.0,
                }],
                ..TickDelta::default()
            },
        )));
        assert!(replica.is_empty());
        assert_eq!(replica.last_applied(), Some(1));
    }

    #[test]
    fn welcome_does_not_block_the_same_tick_baseline() {
        let mut replica = Replica::new();
        replica.apply(&ServerPacket::Welcome {
            tick: 7,
            avatar: Entity(2),
        });
        assert!(replica.apply(&state(
            7,
            TickDelta {
                spawns: vec![spawn(2, 1.0, 2.0)],
                ..TickDelta::default()
            },
        )));
        assert_eq!(replica.avatar, Some(Entity(2)));
        assert_eq!(replica.len(), 1);
    }

    #[test]
    fn game_over_is_latched() {
        let mut replica = Replica::new();
        replica.apply(&ServerPacket::GameOver { tick: 100 });
        assert!(replica.game_over);
    }
}
