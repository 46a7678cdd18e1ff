//! Entity/component store (the Registry).
//!
//! This is a deliberately small ECS suitable for deterministic simulation
//! and net replication. It is not archetype-based; each component type gets
//! a slot vector indexed directly by entity id, so lookup is O(1) and an
//! occupied slot is the sole source of truth for "entity E has component T".
//! Joins visit ids in increasing order, which systems rely on for
//! deterministic tie-breaking.
//!
//! Ownership discipline: exactly one thread (the session's simulation
//! thread) mutates a Registry. The network path never touches components
//! directly; it enqueues typed intents consumed at the start of a tick.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

/// Opaque entity id, unique within one Registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Entity(pub u32);

impl Entity {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Marker for storable component types.
pub trait Component: 'static + Send {}

impl<T: 'static + Send> Component for T {}

/// Slot storage for one component type: indexed directly by entity id,
/// absence is an explicit empty slot.
struct Store<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> Store<T> {
    fn ensure(&mut self, idx: usize) {
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
    }

    fn insert(&mut self, idx: usize, value: T) {
        self.ensure(idx);
        self.slots[idx] = Some(value);
    }

    fn take(&mut self, idx: usize) -> Option<T> {
        self.slots.get_mut(idx).and_then(Option::take)
    }

    fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }
}

/// Object-safe surface every typed store exposes to the Registry.
trait AnyStore: Send {
    fn clear_slot(&mut self, idx: usize);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Component> AnyStore for Store<T> {
    fn clear_slot(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = None;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Authoritative world state for one session.
#[derive(Default)]
pub struct Registry {
    stores: HashMap<TypeId, Box<dyn AnyStore>>,
    alive: Vec<bool>,
    live_count: u32,
    /// Ids free for reuse.
    free: Vec<u32>,
    /// Ids cleared by the latest destroy flush. They move to `free` one
    /// flush later, so an id is never handed out again in the same tick
    /// its destroy record is still in flight.
    retired: Vec<u32>,
    pending_destroy: Vec<Entity>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next free entity id.
    ///
    /// Returns `None` only when the id space is exhausted, which a session
    /// treats as fatal.
    pub fn create(&mut self) -> Option<Entity> {
        let id = if let Some(id) = self.free.pop() {
            id
        } else {
            let id = u32::try_from(self.alive.len()).ok()?;
            self.alive.push(false);
            id
        };
        self.alive[id as usize] = true;
        self.live_count += 1;
        Some(Entity(id))
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.get(entity.index()).copied().unwrap_or(false)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Immediately marks all of the entity's component slots empty.
    /// Idempotent: destroying a dead entity is a no-op.
    pub fn destroy(&mut self, entity: Entity) {
        if !self.is_alive(entity) {
            return;
        }
        let idx = entity.index();
        for store in self.stores.values_mut() {
            store.clear_slot(idx);
        }
        self.alive[idx] = false;
        self.live_count -= 1;
        self.retired.push(entity.0);
    }

    /// Defers destruction to the end of the tick so iteration in progress
    /// is never invalidated.
    pub fn queue_destroy(&mut self, entity: Entity) {
        self.pending_destroy.push(entity);
    }

    /// Runs the deferred destroy pass. Entities queued more than once
    /// appear exactly once in the returned list.
    pub fn flush_destroyed(&mut self) -> Vec<Entity> {
        let recycled = std::mem::take(&mut self.retired);
        self.free.extend(recycled);

        let pending = std::mem::take(&mut self.pending_destroy);
        let mut destroyed = Vec::new();
        for entity in pending {
            if self.is_alive(entity) {
                self.destroy(entity);
                destroyed.push(entity);
            }
        }
        destroyed
    }

    fn store<T: Component>(&self) -> Option<&Store<T>> {
        self.stores
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<Store<T>>())
    }

    fn store_mut<T: Component>(&mut self) -> Option<&mut Store<T>> {
        self.stores
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<Store<T>>())
    }

    fn take_store<T: Component>(&mut self) -> Option<Store<T>> {
        let boxed = self.stores.remove(&TypeId::of::<T>())?;
        boxed.into_any().downcast::<Store<T>>().ok().map(|s| *s)
    }

    fn put_store<T: Component>(&mut self, store: Store<T>) {
        self.stores.insert(TypeId::of::<T>(), Box::new(store));
    }

    /// Inserts/replaces a component for a live entity. Storage grows to at
    /// least `id + 1` on demand; adds to dead entities are dropped so a
    /// destroyed id can never be resurrected mid-tick.
    pub fn add<T: Component>(&mut self, entity: Entity, component: T) {
        if !self.is_alive(entity) {
            return;
        }
        let store = self
            .stores
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Store::<T>::default()));
        let store = store
            .as_any_mut()
            .downcast_mut::<Store<T>>()
            .expect("storage type mismatch");
        store.insert(entity.index(), component);
    }

    /// Removes and returns a component.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.store_mut::<T>()?.take(entity.index())
    }

    /// Gets a component reference.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.store::<T>()?.get(entity.index())
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.store_mut::<T>()?.get_mut(entity.index())
    }

    /// Visits every entity holding `T`, in increasing id order.
    pub fn each<T: Component>(&self, mut f: impl FnMut(Entity, &T)) {
        let Some(store) = self.store::<T>() else {
            return;
        };
        for (idx, slot) in store.slots.iter().enumerate() {
            if let Some(value) = slot {
                f(Entity(idx as u32), value);
            }
        }
    }

    /// Mutable variant of [`Registry::each`].
    pub fn each_mut<T: Component>(&mut self, mut f: impl FnMut(Entity, &mut T)) {
        let Some(store) = self.store_mut::<T>() else {
            return;
        };
        for (idx, slot) in store.slots.iter_mut().enumerate() {
            if let Some(value) = slot {
                f(Entity(idx as u32), value);
            }
        }
    }

    /// Visits entities holding both `A` and `B`, in increasing id order.
    pub fn each2<A: Component, B: Component>(&self, mut f: impl FnMut(Entity, &A, &B)) {
        let (Some(a), Some(b)) = (self.store::<A>(), self.store::<B>()) else {
            return;
        };
        let n = a.slots.len().min(b.slots.len());
        for idx in 0..n {
            if let (Some(av), Some(bv)) = (a.get(idx), b.get(idx)) {
                f(Entity(idx as u32), av, bv);
            }
        }
    }

    /// Mutable join over two distinct component types, in increasing id
    /// order.
    pub fn each_mut2<A: Component, B: Component>(&mut self, mut f: impl FnMut(Entity, &mut A, &mut B)) {
        assert_ne!(
            TypeId::of::<A>(),
            TypeId::of::<B>(),
            "join over duplicate component type"
        );
        let Some(mut a) = self.take_store::<A>() else {
            return;
        };
        let Some(mut b) = self.take_store::<B>() else {
            self.put_store(a);
            return;
        };
        let n = a.slots.len().min(b.slots.len());
        for idx in 0..n {
            if let (Some(av), Some(bv)) = (a.get_mut(idx), b.get_mut(idx)) {
                f(Entity(idx as u32), av, bv);
            }
        }
        self.put_store(a);
        self.put_store(b);
    }

    /// Counts entities holding `T`.
    pub fn count<T: Component>(&self) -> usize {
        let mut n = 0;
        self.each::<T>(|_, _| n += 1);
        n
    }
}

/// Common component: position on the arena floor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Common component: velocity in units per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

/// Common component: hit points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn full(max: f32) -> Self {
        Self { current: max, max }
    }
}

/// Remaining lifetime in seconds; the entity is despawned on expiry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lifetime {
    pub remaining: f32,
}

/// Circular collision body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub radius: f32,
}

/// Marks a client-controlled entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Avatar;

/// In-flight shot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projectile {
    pub owner: Entity,
    pub damage: f32,
    pub radius: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_add_get() {
        let mut reg = Registry::new();
        let e = reg.create().unwrap();
        reg.add(e, Position { x: 1.0, y: 2.0 });
        assert_eq!(reg.get::<Position>(e).unwrap().x, 1.0);
        assert!(reg.get::<Velocity>(e).is_none());
    }

    #[test]
    fn destroy_clears_every_component() {
        let mut reg = Registry::new();
        let e = reg.create().unwrap();
        reg.add(e, Position::default());
        reg.add(e, Velocity::default());
        reg.add(e, Health::full(100.0));

        reg.destroy(e);

        assert!(!reg.is_alive(e));
        assert!(reg.get::<Position>(e).is_none());
        assert!(reg.get::<Velocity>(e).is_none());
        assert!(reg.get::<Health>(e).is_none());
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut reg = Registry::new();
        let e = reg.create().unwrap();
        reg.destroy(e);
        reg.destroy(e);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn double_queue_yields_one_destroy() {
        let mut reg = Registry::new();
        let e = reg.create().unwrap();
        reg.add(e, Position::default());

        reg.queue_destroy(e);
        reg.queue_destroy(e);
        let destroyed = reg.flush_destroyed();

        assert_eq!(destroyed, vec![e]);
    }

    #[test]
    fn ids_recycle_one_flush_late() {
        let mut reg = Registry::new();
        let e = reg.create().unwrap();
        reg.queue_destroy(e);
        reg.flush_destroyed();

        // The freed id must not come back while its destroy record may
        // still be in flight.
        let next = reg.create().unwrap();
        assert_ne!(next, e);

        reg.flush_destroyed();
        let reused = reg.create().unwrap();
        assert_eq!(reused, e);
    }

    #[test]
    fn join_visits_increasing_ids_with_full_set() {
        let mut reg = Registry::new();
        let a = reg.create().unwrap();
        let b = reg.create().unwrap();
        let c = reg.create().unwrap();
        reg.add(a, Position::default());
        reg.add(a, Velocity::default());
        reg.add(b, Position::default());
        reg.add(c, Position::default());
        reg.add(c, Velocity::default());

        let mut seen = Vec::new();
        reg.each2::<Position, Velocity>(|e, _, _| seen.push(e));
        assert_eq!(seen, vec![a, c]);

        let mut seen_mut = Vec::new();
        reg.each_mut2::<Position, Velocity>(|e, _, _| seen_mut.push(e));
        assert_eq!(seen_mut, vec![a, c]);
    }

    #[test]
    fn storage_grows_on_demand() {
        let mut reg = Registry::new();
        let mut last = None;
        for _ in 0..100 {
            last = reg.create();
        }
        let e = last.unwrap();
        reg.add(e, Health::full(50.0));
        assert_eq!(reg.get::<Health>(e).unwrap().max, 50.0);
    }

    #[test]
    fn remove_returns_component() {
        let mut reg = Registry::new();
        let e = reg.create().unwrap();
        reg.add(e, Lifetime { remaining: 1.5 });
        let taken = reg.remove::<Lifetime>(e).unwrap();
        assert_eq!(taken.remaining, 1.5);
        assert!(reg.get::<Lifetime>(e).is_none());
    }
}
