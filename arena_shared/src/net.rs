//! Wire protocol.
//!
//! Every datagram starts with a one-byte opcode; all integers are
//! big-endian. Decoding validates the received length against the exact
//! expected size for the opcode before interpreting anything, and returns
//! `None` on any mismatch; a malformed packet is dropped, never partially
//! applied. Serialization stays explicit (no serde on the wire) because
//! the byte layout is part of the protocol contract.
//!
//! Tick ordering rule: server-to-client state packets carry `server_tick`;
//! a client discards any state packet whose tick is at or below the
//! highest tick it has applied. The protocol favors recency over
//! completeness.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    delta::{Archetype, ComponentTag, SpawnRecord, TickDelta, UpdateRecord},
    ecs::Entity,
    input::{Buttons, InputFrame},
};

pub const OP_WELCOME: u8 = 0x01;
pub const OP_PLAYER_INPUT: u8 = 0x02;
pub const OP_ENTITY_UPDATE: u8 = 0x03;
pub const OP_ENTITY_SPAWN: u8 = 0x04;
pub const OP_ENTITY_DESTROY: u8 = 0x05;
pub const OP_GAME_OVER: u8 = 0x06;

pub const OP_CREATE_ROOM: u8 = 0x10;
pub const OP_CREATE_INFINITE: u8 = 0x11;
pub const OP_JOIN: u8 = 0x12;
pub const OP_JOIN_SUCCESS: u8 = 0x13;
pub const OP_JOIN_FAILURE: u8 = 0x14;

/// entity u32 + archetype u8 + x f32 + y f32.
const SPAWN_RECORD_LEN: usize = 13;
/// entity u32 + component tag u8 + two f32 values.
const UPDATE_RECORD_LEN: usize = 13;
/// entity u32.
const DESTROY_RECORD_LEN: usize = 4;

/// Receive buffer size for any arena datagram.
pub const MAX_DATAGRAM: usize = 2048;

/// Admission requests a client sends to the lobby port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyRequest {
    /// Open a new four-player room; private rooms are skipped by quick
    /// join.
    CreateRoom { private: bool },
    /// Open a single-player endless room, started immediately.
    CreateInfinite,
    /// Quick join: first public room with capacity, else a fresh one.
    Join,
}

/// Reason byte carried by `JOIN_FAILURE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinFailureReason {
    ServerFull = 1,
    Internal = 2,
    Timeout = 3,
}

impl JoinFailureReason {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(JoinFailureReason::ServerFull),
            2 => Some(JoinFailureReason::Internal),
            3 => Some(JoinFailureReason::Timeout),
            _ => None,
        }
    }
}

/// Lobby replies to admission requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyReply {
    /// Admission succeeded; all further traffic goes to this port.
    JoinSuccess { port: u16 },
    JoinFailure { reason: JoinFailureReason },
}

/// Packets a session sends to its clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// First contact reply: the client's assigned avatar entity.
    Welcome { tick: u32, avatar: Entity },
    /// Per-tick state packet carrying the delta.
    State { tick: u32, delta: TickDelta },
    GameOver { tick: u32 },
}

/// Packets a client sends to a session port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPacket {
    Input(InputFrame),
}

pub fn encode_lobby_request(req: &LobbyRequest) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    match req {
        LobbyRequest::CreateRoom { private } => {
            buf.put_u8(OP_CREATE_ROOM);
            buf.put_u8(u8::from(*private));
        }
        LobbyRequest::CreateInfinite => buf.put_u8(OP_CREATE_INFINITE),
        LobbyRequest::Join => buf.put_u8(OP_JOIN),
    }
    buf.freeze()
}

pub fn decode_lobby_request(buf: &[u8]) -> Option<LobbyRequest> {
    let (&op, body) = buf.split_first()?;
    match op {
        OP_CREATE_ROOM => {
            if body.len() != 1 {
                return None;
            }
            match body[0] {
                0 => Some(LobbyRequest::CreateRoom { private: false }),
                1 => Some(LobbyRequest::CreateRoom { private: true }),
                _ => None,
            }
        }
        OP_CREATE_INFINITE if body.is_empty() => Some(LobbyRequest::CreateInfinite),
        OP_JOIN if body.is_empty() => Some(LobbyRequest::Join),
        _ => None,
    }
}

pub fn encode_lobby_reply(reply: &LobbyReply) -> Bytes {
    let mut buf = BytesMut::with_capacity(3);
    match reply {
        LobbyReply::JoinSuccess { port } => {
            buf.put_u8(OP_JOIN_SUCCESS);
            buf.put_u16(*port);
        }
        LobbyReply::JoinFailure { reason } => {
            buf.put_u8(OP_JOIN_FAILURE);
            buf.put_u8(*reason as u8);
        }
    }
    buf.freeze()
}

pub fn decode_lobby_reply(buf: &[u8]) -> Option<LobbyReply> {
    let (&op, mut body) = buf.split_first()?;
    match op {
        OP_JOIN_SUCCESS => {
            if body.len() != 2 {
                return None;
            }
            Some(LobbyReply::JoinSuccess {
                port: body.get_u16(),
            })
        }
        OP_JOIN_FAILURE => {
            if body.len() != 1 {
                return None;
            }
            Some(LobbyReply::JoinFailure {
                reason: JoinFailureReason::from_u8(body[0])?,
            })
        }
        _ => None,
    }
}

pub fn encode_client_packet(pkt: &ClientPacket) -> Bytes {
    let ClientPacket::Input(frame) = pkt;
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u8(OP_PLAYER_INPUT);
    buf.put_u32(frame.seq);
    buf.put_u8(frame.buttons.bits());
    buf.freeze()
}

pub fn decode_client_packet(buf: &[u8]) -> Option<ClientPacket> {
    let (&op, mut body) = buf.split_first()?;
    match op {
        OP_PLAYER_INPUT => {
            if body.len() != 5 {
                return None;
            }
            let seq = body.get_u32();
            let buttons = Buttons::from_bits(body.get_u8())?;
            Some(ClientPacket::Input(InputFrame { seq, buttons }))
        }
        _ => None,
    }
}

fn put_spawns(buf: &mut BytesMut, spawns: &[SpawnRecord]) {
    buf.put_u16(spawns.len() as u16);
    for s in spawns {
        buf.put_u32(s.entity.0);
        buf.put_u8(s.archetype.as_u8());
        buf.put_f32(s.x);
        buf.put_f32(s.y);
    }
}

fn put_destroys(buf: &mut BytesMut, destroys: &[Entity]) {
    buf.put_u16(destroys.len() as u16);
    for d in destroys {
        buf.put_u32(d.0);
    }
}

fn put_updates(buf: &mut BytesMut, updates: &[UpdateRecord]) {
    buf.put_u16(updates.len() as u16);
    for u in updates {
        buf.put_u32(u.entity.0);
        buf.put_u8(u.tag.as_u8());
        buf.put_f32(u.a);
        buf.put_f32(u.b);
    }
}

pub fn encode_server_packet(pkt: &ServerPacket) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    match pkt {
        ServerPacket::Welcome { tick, avatar } => {
            buf.put_u8(OP_WELCOME);
            buf.put_u32(*tick);
            buf.put_u32(avatar.0);
        }
        ServerPacket::GameOver { tick } => {
            buf.put_u8(OP_GAME_OVER);
            buf.put_u32(*tick);
        }
        // One state packet per tick; the narrowest opcode that fits the
        // delta's shape is chosen so the stale-tick rule stays
        // per-packet.
        ServerPacket::State { tick, delta } if delta.only_spawns() => {
            buf.put_u8(OP_ENTITY_SPAWN);
            buf.put_u32(*tick);
            put_spawns(&mut buf, &delta.spawns);
        }
        ServerPacket::State { tick, delta } if delta.only_destroys() => {
            buf.put_u8(OP_ENTITY_DESTROY);
            buf.put_u32(*tick);
            put_destroys(&mut buf, &delta.destroys);
        }
        ServerPacket::State { tick, delta } => {
            buf.put_u8(OP_ENTITY_UPDATE);
            buf.put_u32(*tick);
            put_spawns(&mut buf, &delta.spawns);
            put_destroys(&mut buf, &delta.destroys);
            put_updates(&mut buf, &delta.updates);
        }
    }
    buf.freeze()
}

fn read_spawns(cur: &mut &[u8]) -> Option<Vec<SpawnRecord>> {
    if cur.remaining() < 2 {
        return None;
    }
    let count = cur.get_u16() as usize;
    if cur.remaining() < count * SPAWN_RECORD_LEN {
        return None;
    }
    let mut spawns = Vec::with_capacity(count);
    for _ in 0..count {
        let entity = Entity(cur.get_u32());
        let archetype = Archetype::from_u8(cur.get_u8())?;
        let x = cur.get_f32();
        let y = cur.get_f32();
        spawns.push(SpawnRecord {
            entity,
            archetype,
            x,
            y,
        });
    }
    Some(spawns)
}

fn read_destroys(cur: &mut &[u8]) -> Option<Vec<Entity>> {
    if cur.remaining() < 2 {
        return None;
    }
    let count = cur.get_u16() as usize;
    if cur.remaining() < count * DESTROY_RECORD_LEN {
        return None;
    }
    let mut destroys = Vec::with_capacity(count);
    for _ in 0..count {
        destroys.push(Entity(cur.get_u32()));
    }
    Some(destroys)
}

fn read_updates(cur: &mut &[u8]) -> Option<Vec<UpdateRecord>> {
    if cur.remaining() < 2 {
        return None;
    }
    let count = cur.get_u16() as usize;
    if cur.remaining() < count * UPDATE_RECORD_LEN {
        return None;
    }
    let mut updates = Vec::with_capacity(count);
    for _ in 0..count {
        let entity = Entity(cur.get_u32());
        let tag = ComponentTag::from_u8(cur.get_u8())?;
        let a = cur.get_f32();
        let b = cur.get_f32();
        updates.push(UpdateRecord { entity, tag, a, b });
    }
    Some(updates)
}

pub fn decode_server_packet(buf: &[u8]) -> Option<ServerPacket> {
    let (&op, body) = buf.split_first()?;
    let mut cur = body;
    match op {
        OP_WELCOME => {
            if cur.len() != 8 {
                return None;
            }
            let tick = cur.get_u32();
            let avatar = Entity(cur.get_u32());
            Some(ServerPacket::Welcome { tick, avatar })
        }
        OP_GAME_OVER => {
            if cur.len() != 4 {
                return None;
            }
            Some(ServerPacket::GameOver {
                tick: cur.get_u32(),
            })
        }
        OP_ENTITY_SPAWN => {
            if cur.remaining() < 4 {
                return None;
            }
            let tick = cur.get_u32();
            let spawns = read_spawns(&mut cur)?;
            if cur.has_remaining() {
                return None;
            }
            Some(ServerPacket::State {
                tick,
                delta: TickDelta {
                    spawns,
                    ..TickDelta::default()
                },
            })
        }
        OP_ENTITY_DESTROY => {
            if cur.remaining() < 4 {
                return None;
            }
            let tick = cur.get_u32();
            let destroys = read_destroys(&mut cur)?;
            if cur.has_remaining() {
                return None;
            }
            Some(ServerPacket::State {
                tick,
                delta: TickDelta {
                    destroys,
                    ..TickDelta::default()
                },
            })
        }
        OP_ENTITY_UPDATE => {
            if cur.remaining() < 4 {
                return None;
            }
            let tick = cur.get_u32();
            let spawns = read_spawns(&mut cur)?;
            let destroys = read_destroys(&mut cur)?;
            let updates = read_updates(&mut cur)?;
            if cur.has_remaining() {
                return None;
            }
            Some(ServerPacket::State {
                tick,
                delta: TickDelta {
                    spawns,
                    destroys,
                    updates,
                },
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    fn sample_delta() -> TickDelta {
        TickDelta {
            spawns: vec![SpawnRecord {
                entity: Entity(3),
                archetype: Archetype::Projectile,
                x: 10.0,
                y: 20.0,
            }],
            destroys: vec![Entity(7)],
            updates: vec![UpdateRecord {
                entity: Entity(1),
                tag: ComponentTag::Position,
                a: 1.5,
                b: -2.5,
            }],
        }
    }

    #[test]
    fn lobby_request_roundtrip() {
        for req in [
            LobbyRequest::CreateRoom { private: true },
            LobbyRequest::CreateRoom { private: false },
            LobbyRequest::CreateInfinite,
            LobbyRequest::Join,
        ] {
            let bytes = encode_lobby_request(&req);
            assert_eq!(decode_lobby_request(&bytes), Some(req));
        }
    }

    #[test]
    fn lobby_reply_roundtrip() {
        for reply in [
            LobbyReply::JoinSuccess { port: 40123 },
            LobbyReply::JoinFailure {
                reason: JoinFailureReason::ServerFull,
            },
        ] {
            let bytes = encode_lobby_reply(&reply);
            assert_eq!(decode_lobby_reply(&bytes), Some(reply));
        }
    }

    #[test]
    fn input_roundtrip() {
        let pkt = ClientPacket::Input(InputFrame {
            seq: 42,
            buttons: Buttons::UP | Buttons::FIRE,
        });
        let bytes = encode_client_packet(&pkt);
        assert_eq!(decode_client_packet(&bytes), Some(pkt));
    }

    #[test]
    fn state_roundtrip_combined() {
        let pkt = ServerPacket::State {
            tick: 1000,
            delta: sample_delta(),
        };
        let bytes = encode_server_packet(&pkt);
        assert_eq!(bytes[0], OP_ENTITY_UPDATE);
        assert_eq!(decode_server_packet(&bytes), Some(pkt));
    }

    #[test]
    fn state_narrows_to_spawn_and_destroy_opcodes() {
        let mut rec = crate::delta::DeltaRecorder::new();
        rec.record_spawn(Entity(1), Archetype::Player, Vec2::new(5.0, 6.0));
        let spawn_only = ServerPacket::State {
            tick: 1,
            delta: rec.take(),
        };
        let bytes = encode_server_packet(&spawn_only);
        assert_eq!(bytes[0], OP_ENTITY_SPAWN);
        assert_eq!(decode_server_packet(&bytes), Some(spawn_only));

        rec.record_destroy(Entity(9));
        let destroy_only = ServerPacket::State {
            tick: 2,
            delta: rec.take(),
        };
        let bytes = encode_server_packet(&destroy_only);
        assert_eq!(bytes[0], OP_ENTITY_DESTROY);
        assert_eq!(decode_server_packet(&bytes), Some(destroy_only));
    }

    #[test]
    fn empty_delta_is_a_zero_count_update() {
        let pkt = ServerPacket::State {
            tick: 5,
            delta: TickDelta::default(),
        };
        let bytes = encode_server_packet(&pkt);
        assert_eq!(bytes[0], OP_ENTITY_UPDATE);
        assert_eq!(bytes.len(), 1 + 4 + 6);
        assert_eq!(decode_server_packet(&bytes), Some(pkt));
    }

    #[test]
    fn welcome_and_game_over_roundtrip() {
        for pkt in [
            ServerPacket::Welcome {
                tick: 3,
                avatar: Entity(12),
            },
            ServerPacket::GameOver { tick: 900 },
        ] {
            let bytes = encode_server_packet(&pkt);
            assert_eq!(decode_server_packet(&bytes), Some(pkt));
        }
    }

    #[test]
    fn wrong_size_packets_are_dropped() {
        // WELCOME body one byte short.
        let mut bytes = encode_server_packet(&ServerPacket::Welcome {
            tick: 1,
            avatar: Entity(2),
        })
        .to_vec();
        bytes.pop();
        assert_eq!(decode_server_packet(&bytes), None);

        // Trailing garbage after a valid state packet.
        let mut bytes = encode_server_packet(&ServerPacket::State {
            tick: 1,
            delta: sample_delta(),
        })
        .to_vec();
        bytes.push(0);
        assert_eq!(decode_server_packet(&bytes), None);

        // Truncated spawn section.
        let mut bytes = encode_server_packet(&ServerPacket::State {
            tick: 1,
            delta: sample_delta(),
        })
        .to_vec();
        bytes.truncate(bytes.len() - 10);
        assert_eq!(decode_server_packet(&bytes), None);

        // Oversized lobby request.
        assert_eq!(decode_lobby_request(&[OP_JOIN, 0]), None);
    }

    #[test]
    fn unknown_opcode_is_dropped() {
        assert_eq!(decode_server_packet(&[0x7f, 0, 0, 0, 0]), None);
        assert_eq!(decode_lobby_request(&[0x7f]), None);
        assert_eq!(decode_client_packet(&[0x7f, 0, 0, 0, 0, 0]), None);
    }

    #[test]
    fn unknown_button_bits_are_dropped() {
        let mut bytes = encode_client_packet(&ClientPacket::Input(InputFrame {
            seq: 1,
            buttons: Buttons::FIRE,
        }))
        .to_vec();
        *bytes.last_mut().unwrap() = 0xE0;
        assert_eq!(decode_client_packet(&bytes), None);
    }

    #[test]
    fn empty_datagram_is_dropped() {
        assert_eq!(decode_server_packet(&[]), None);
        assert_eq!(decode_lobby_request(&[]), None);
    }
}
