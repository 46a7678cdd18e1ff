//! Room bookkeeping.
//!
//! # Room lifecycle
//! 1. A client creates a room (or quick join opens one on its behalf).
//! 2. Further quick joins fill public rooms in creation order.
//! 3. When the room reaches capacity its session starts and the room
//!    stops admitting.
//! 4. The room is removed when its session stops.
//!
//! Admission runs entirely on the lobby task, so two clients racing for
//! the last seat are resolved in arrival order with no locking.

use std::net::SocketAddr;
use std::time::Instant;

/// Unique room identifier, never reused within a server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId(pub u64);

/// How a room admits members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMode {
    /// Four players, fillable by quick join.
    Public,
    /// Four players, creator's party only; quick join skips it.
    Private,
    /// Single player, endless session, starts immediately.
    Infinite,
}

impl RoomMode {
    pub fn capacity(self) -> usize {
        match self {
            RoomMode::Public | RoomMode::Private => 4,
            RoomMode::Infinite => 1,
        }
    }

    pub fn quick_joinable(self) -> bool {
        matches!(self, RoomMode::Public)
    }
}

/// Admission errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    Full,
    AlreadyMember,
    Started,
}

/// Result of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; the room is still waiting for more players.
    Waiting,
    /// Admitted as the last member; the session must start now.
    Filled,
}

/// One room waiting to fill or already playing.
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub mode: RoomMode,
    pub members: Vec<SocketAddr>,
    /// Set once the room fills; no admissions after this.
    pub started: bool,
    /// Session socket port, bound at creation so replies can carry it.
    pub port: u16,
    pub created_at: Instant,
}

impl Room {
    pub fn new(id: RoomId, mode: RoomMode, port: u16) -> Self {
        Room {
            id,
            mode,
            members: Vec::with_capacity(mode.capacity()),
            started: false,
            port,
            created_at: Instant::now(),
        }
    }

    pub fn is_member(&self, addr: SocketAddr) -> bool {
        self.members.contains(&addr)
    }

    pub fn has_capacity(&self) -> bool {
        !self.started && self.members.len() < self.mode.capacity()
    }

    /// Admits one endpoint. `Filled` is returned for exactly one
    /// admission per room, the one that takes the last seat.
    pub fn admit(&mut self, addr: SocketAddr) -> Result<Admission, RoomError> {
        if self.started {
            return Err(RoomError::Started);
        }
        if self.is_member(addr) {
            return Err(RoomError::AlreadyMember);
        }
        if self.members.len() >= self.mode.capacity() {
            return Err(RoomError::Full);
        }
        self.members.push(addr);
        if self.members.len() == self.mode.capacity() {
            self.started = true;
            Ok(Admission::Filled)
        } else {
            Ok(Admission::Waiting)
        }
    }
}

/// All open rooms, owned by the lobby task.
#[derive(Default)]
pub struct RoomTable {
    rooms: Vec<Room>,
    next_id: u64,
    max_rooms: usize,
}

impl RoomTable {
    pub fn new(max_rooms: usize) -> Self {
        RoomTable {
            rooms: Vec::new(),
            next_id: 1,
            max_rooms,
        }
    }

    /// Opens a room, or `None` at the room cap.
    pub fn create(&mut self, mode: RoomMode, port: u16) -> Option<&mut Room> {
        if self.rooms.len() >= self.max_rooms {
            return None;
        }
        let id = RoomId(self.next_id);
        self.next_id += 1;
        self.rooms.push(Room::new(id, mode, port));
        self.rooms.last_mut()
    }

    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.id == id)
    }

    /// Quick-join target: the oldest public room with a free seat.
    pub fn find_public_with_capacity(&mut self) -> Option<&mut Room> {
        self.rooms
            .iter_mut()
            .find(|r| r.mode.quick_joinable() && r.has_capacity())
    }

    /// Room the endpoint is already seated in, if any. An endpoint sits
    /// in at most one room because admission checks this first.
    pub fn find_by_member(&self, addr: SocketAddr) -> Option<&Room> {
        self.rooms.iter().find(|r| r.is_member(addr))
    }

    pub fn remove(&mut self, id: RoomId) -> Option<Room> {
        let idx = self.rooms.iter().position(|r| r.id == id)?;
        Some(self.rooms.remove(idx))
    }

    /// Unstarted rooms older than `max_age`, for the prune sweep.
    pub fn stale_unstarted(&self, now: Instant, max_age: std::time::Duration) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|r| !r.started && now.duration_since(r.created_at) >= max_age)
            .map(|r| r.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u16) -> SocketAddr {
        format!("127.0.0.1:{}", 10_000 + n).parse().unwrap()
    }

    #[test]
    fn room_fills_at_capacity() {
        let mut room = Room::new(RoomId(1), RoomMode::Public, 9000);
        assert_eq!(room.admit(addr(1)), Ok(Admission::Waiting));
        assert_eq!(room.admit(addr(2)), Ok(Admission::Waiting));
        assert_eq!(room.admit(addr(3)), Ok(Admission::Waiting));
        assert_eq!(room.admit(addr(4)), Ok(Admission::Filled));
        assert!(room.started);
    }

    #[test]
    fn fifth_player_is_rejected() {
        let mut room = Room::new(RoomId(1), RoomMode::Public, 9000);
        for i in 1..=4 {
            room.admit(addr(i)).unwrap();
        }
        assert_eq!(room.admit(addr(5)), Err(RoomError::Started));
    }

    #[test]
    fn duplicate_endpoint_is_rejected() {
        let mut room = Room::new(RoomId(1), RoomMode::Public, 9000);
        room.admit(addr(1)).unwrap();
        assert_eq!(room.admit(addr(1)), Err(RoomError::AlreadyMember));
        assert_eq!(room.members.len(), 1);
    }

    #[test]
    fn infinite_room_fills_with_one() {
        let mut room = Room::new(RoomId(1), RoomMode::Infinite, 9000);
        assert_eq!(room.admit(addr(1)), Ok(Admission::Filled));
    }

    #[test]
    fn quick_join_skips_private_and_started_rooms() {
        let mut table = RoomTable::new(16);
        table.create(RoomMode::Private, 9001).unwrap();
        let started = table.create(RoomMode::Public, 9002).unwrap().id;
        for i in 1..=4 {
            table.get_mut(started).unwrap().admit(addr(i)).unwrap();
        }
        let open = table.create(RoomMode::Public, 9003).unwrap().id;

        let found = table.find_public_with_capacity().unwrap();
        assert_eq!(found.id, open);
    }

    #[test]
    fn quick_join_prefers_oldest_room() {
        let mut table = RoomTable::new(16);
        let first = table.create(RoomMode::Public, 9001).unwrap().id;
        table.create(RoomMode::Public, 9002).unwrap();
        assert_eq!(table.find_public_with_capacity().unwrap().id, first);
    }

    #[test]
    fn member_lookup_finds_the_seated_room() {
        let mut table = RoomTable::new(16);
        let id = table.create(RoomMode::Public, 9001).unwrap().id;
        table.get_mut(id).unwrap().admit(addr(1)).unwrap();

        assert_eq!(table.find_by_member(addr(1)).unwrap().id, id);
        assert!(table.find_by_member(addr(2)).is_none());
    }

    #[test]
    fn room_cap_is_enforced() {
        let mut table = RoomTable::new(2);
        table.create(RoomMode::Public, 9001).unwrap();
        table.create(RoomMode::Public, 9002).unwrap();
        assert!(table.create(RoomMode::Public, 9003).is_none());

        let id = table.get(RoomId(1)).unwrap().id;
        table.remove(id).unwrap();
        assert!(table.create(RoomMode::Public, 9004).is_some());
    }

    #[test]
    fn stale_sweep_skips_started_rooms() {
        let mut table = RoomTable::new(16);
        let waiting = table.create(RoomMode::Public, 9001).unwrap().id;
        let started = table.create(RoomMode::Public, 9002).unwrap().id;
        for i in 1..=4 {
            table.get_mut(started).unwrap().admit(addr(i)).unwrap();
        }

        let later = Instant::now() + std::time::Duration::from_secs(120);
        let stale = table.stale_unstarted(later, std::time::Duration::from_secs(60));
        assert_eq!(stale, vec![waiting]);
    }
}
