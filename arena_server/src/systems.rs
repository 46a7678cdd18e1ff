//! Simulation systems.
//!
//! Each system is one pass over the registry. Systems run in a fixed
//! order every tick and tag their own mutations in the delta recorder as
//! they make them; destruction always goes through `queue_destroy` so a
//! pass in progress never observes a half-removed entity.

use arena_shared::{
    delta::{ComponentTag, DeltaRecorder},
    ecs::{Body, Entity, Health, Lifetime, Position, Projectile, Registry, Velocity},
    math::Vec2,
};

/// Arena extent; positions are clamped to `[0, w] x [0, h]`.
pub const ARENA_BOUNDS: Vec2 = Vec2::new(800.0, 600.0);

pub const MOVE_SPEED: f32 = 120.0;
pub const PLAYER_RADIUS: f32 = 16.0;
pub const PLAYER_HEALTH: f32 = 100.0;

pub const PROJECTILE_SPEED: f32 = 320.0;
pub const PROJECTILE_LIFETIME: f32 = 1.5;
pub const PROJECTILE_DAMAGE: f32 = 25.0;
pub const PROJECTILE_RADIUS: f32 = 4.0;

/// Ticks between shots for one avatar.
pub const FIRE_COOLDOWN_TICKS: u32 = 12;

/// Everything a system may touch during one tick.
pub struct TickCtx<'a> {
    pub registry: &'a mut Registry,
    pub delta: &'a mut DeltaRecorder,
    pub dt: f32,
    pub tick: u32,
}

/// One simulation pass. Implementations must not retain registry state
/// across ticks.
pub trait System: Send {
    fn name(&self) -> &'static str;
    fn run(&mut self, ctx: &mut TickCtx<'_>);
}

/// Integrates velocity into position and clamps to the arena.
pub struct Movement {
    pub bounds: Vec2,
}

impl Default for Movement {
    fn default() -> Self {
        Movement {
            bounds: ARENA_BOUNDS,
        }
    }
}

impl System for Movement {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn run(&mut self, ctx: &mut TickCtx<'_>) {
        let TickCtx {
            registry,
            delta,
            dt,
            ..
        } = ctx;
        let dt = *dt;
        let bounds = self.bounds;
        let mut moved = Vec::new();
        registry.each_mut2::<Position, Velocity>(|e, pos, vel| {
            if vel.dx == 0.0 && vel.dy == 0.0 {
                return;
            }
            pos.x = (pos.x + vel.dx * dt).clamp(0.0, bounds.x);
            pos.y = (pos.y + vel.dy * dt).clamp(0.0, bounds.y);
            moved.push((e, pos.x, pos.y));
        });
        for (e, x, y) in moved {
            delta.record_update(e, ComponentTag::Position, x, y);
        }
    }
}

/// Projectile-versus-body overlap. A projectile never hits its owner; on
/// the first hit it is spent and the target takes damage.
#[derive(Default)]
pub struct Collision;

impl System for Collision {
    fn name(&self) -> &'static str {
        "collision"
    }

    fn run(&mut self, ctx: &mut TickCtx<'_>) {
        let TickCtx {
            registry, delta, ..
        } = ctx;

        let mut shots = Vec::new();
        registry.each2::<Position, Projectile>(|e, pos, proj| {
            shots.push((e, Vec2::new(pos.x, pos.y), *proj));
        });

        let mut hits: Vec<(Entity, f32)> = Vec::new();
        let mut spent = Vec::new();
        for (shot, shot_pos, proj) in shots {
            let mut hit = None;
            registry.each2::<Position, Body>(|target, pos, body| {
                if hit.is_some() || target == proj.owner || target == shot {
                    return;
                }
                let delta_pos = Vec2::new(pos.x, pos.y) - shot_pos;
                let reach = body.radius + proj.radius;
                if delta_pos.len_sq() <= reach * reach {
                    hit = Some(target);
                }
            });
            if let Some(target) = hit {
                hits.push((target, proj.damage));
                spent.push(shot);
            }
        }

        for (target, damage) in hits {
            if let Some(health) = registry.get_mut::<Health>(target) {
                health.current = (health.current - damage).max(0.0);
                let (current, max) = (health.current, health.max);
                delta.record_update(target, ComponentTag::Health, current, max);
            }
        }
        for shot in spent {
            registry.queue_destroy(shot);
        }
    }
}

/// Ticks down `Lifetime` and despawns expired entities.
#[derive(Default)]
pub struct Expiry;

impl System for Expiry {
    fn name(&self) -> &'static str {
        "expiry"
    }

    fn run(&mut self, ctx: &mut TickCtx<'_>) {
        let TickCtx {
            registry, dt, ..
        } = ctx;
        let dt = *dt;
        let mut expired = Vec::new();
        registry.each_mut::<Lifetime>(|e, life| {
            life.remaining -= dt;
            if life.remaining <= 0.0 {
                expired.push(e);
            }
        });
        for e in expired {
            registry.queue_destroy(e);
        }
    }
}

/// Despawns entities whose health has reached zero.
#[derive(Default)]
pub struct Cleanup;

impl System for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn run(&mut self, ctx: &mut TickCtx<'_>) {
        let TickCtx { registry, .. } = ctx;
        let mut dead = Vec::new();
        registry.each::<Health>(|e, health| {
            if health.current <= 0.0 {
                dead.push(e);
            }
        });
        for e in dead {
            registry.queue_destroy(e);
        }
    }
}

/// The fixed system order every session runs.
pub fn standard_systems() -> Vec<Box<dyn System>> {
    vec![
        Box::new(Movement::default()),
        Box::new(Collision),
        Box::new(Expiry),
        Box::new(Cleanup),
    ]
}
