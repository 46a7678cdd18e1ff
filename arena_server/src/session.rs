//! Per-room game session.
//!
//! A session owns a UDP socket and a dedicated simulation thread. The
//! socket task (on the tokio runtime) only moves datagrams between the
//! socket and a pair of bounded channels; the simulation thread owns the
//! registry outright and never shares it. A full channel drops the
//! datagram, which is the same contract the network already gives us.
//!
//! Tick order: drain inputs, sweep timeouts, apply inputs, run systems,
//! flush destroys, broadcast, announce game over if the match ended,
//! advance the tick counter.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use bytes::Bytes;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use arena_shared::{
    delta::{Archetype, ComponentTag, DeltaRecorder},
    ecs::{Avatar, Body, Entity, Health, Lifetime, Position, Projectile, Registry, Velocity},
    input::Buttons,
    math::Vec2,
    net::{
        decode_client_packet, encode_server_packet, ClientPacket, ServerPacket, MAX_DATAGRAM,
    },
};

use crate::rooms::RoomId;
use crate::systems::{
    standard_systems, System, TickCtx, ARENA_BOUNDS, FIRE_COOLDOWN_TICKS, MOVE_SPEED,
    PLAYER_HEALTH, PLAYER_RADIUS, PROJECTILE_DAMAGE, PROJECTILE_LIFETIME, PROJECTILE_RADIUS,
    PROJECTILE_SPEED,
};

const INBOUND_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 1024;

/// A persistently faulting system stops its session after this many
/// consecutive faulting ticks.
const MAX_SYSTEM_FAILURES: u32 = 3;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    /// Final tick work done; the loop exits at the end of this tick.
    Stopping,
    Stopped,
}

/// Sent to the lobby when a session winds down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Stopped { room: RoomId },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room: RoomId,
    pub tick_hz: u32,
    pub client_timeout: Duration,
    /// Endless sessions never declare game over.
    pub endless: bool,
}

/// Per-client connection state, keyed by the admitted endpoint.
struct Conn {
    avatar: Entity,
    /// Highest input sequence applied; frames at or below it are dropped.
    last_seq: Option<u32>,
    buttons: Buttons,
    /// Last nonzero movement direction; shots travel this way.
    facing: Vec2,
    fire_cooldown: u32,
    last_seen: Instant,
    /// First datagram seen; eligible for broadcast.
    welcomed: bool,
    /// Welcome plus full-state baseline still owed at next broadcast.
    needs_baseline: bool,
}

/// A session socket bound ahead of the room filling, so admission
/// replies can already carry the port.
pub struct BoundSession {
    socket: UdpSocket,
    port: u16,
}

impl BoundSession {
    pub async fn bind(ip: IpAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((ip, 0))
            .await
            .context("bind session socket")?;
        let port = socket.local_addr().context("session local addr")?.port();
        Ok(BoundSession { socket, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Handle the lobby keeps for a running session.
pub struct SessionHandle {
    pub port: u16,
    stop: Arc<AtomicBool>,
    sim: Option<std::thread::JoinHandle<()>>,
    io: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    /// Stops the simulation thread, then waits for the socket task to
    /// drain the remaining outbound packets and exit on its own (the
    /// joined thread drops the outbound sender, closing the channel).
    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(sim) = self.sim.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = sim.join();
            })
            .await;
        }
        let _ = self.io.await;
    }
}

/// The simulation side of one session. Single-threaded by construction.
pub struct Session {
    cfg: SessionConfig,
    registry: Registry,
    recorder: DeltaRecorder,
    systems: Vec<Box<dyn System>>,
    system_failures: Vec<u32>,
    conns: HashMap<SocketAddr, Conn>,
    tick: u32,
    state: SessionState,
    started_with: usize,
    inbound: mpsc::Receiver<(SocketAddr, Vec<u8>)>,
    outbound: mpsc::Sender<(SocketAddr, Bytes)>,
    events: mpsc::Sender<SessionEvent>,
    stop: Arc<AtomicBool>,
}

impl Session {
    /// Builds the session world: one avatar per admitted player, spawned
    /// at a random point away from the walls.
    pub(crate) fn new(
        cfg: SessionConfig,
        players: &[SocketAddr],
        inbound: mpsc::Receiver<(SocketAddr, Vec<u8>)>,
        outbound: mpsc::Sender<(SocketAddr, Bytes)>,
        events: mpsc::Sender<SessionEvent>,
        stop: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let mut registry = Registry::new();
        let mut recorder = DeltaRecorder::new();
        let mut conns = HashMap::new();
        let mut rng = rand::thread_rng();
        let now = Instant::now();

        for &addr in players {
            let avatar = registry
                .create()
                .context("entity id space exhausted at session start")?;
            let pos = Vec2::new(
                rng.gen_range(60.0..ARENA_BOUNDS.x - 60.0),
                rng.gen_range(60.0..ARENA_BOUNDS.y - 60.0),
            );
            registry.add(avatar, Position { x: pos.x, y: pos.y });
            registry.add(avatar, Velocity::default());
            registry.add(avatar, Health::full(PLAYER_HEALTH));
            registry.add(avatar, Body { radius: PLAYER_RADIUS });
            registry.add(avatar, Avatar);
            recorder.record_spawn(avatar, Archetype::Player, pos);

            conns.insert(
                addr,
                Conn {
                    avatar,
                    last_seq: None,
                    buttons: Buttons::empty(),
                    facing: Vec2::new(1.0, 0.0),
                    fire_cooldown: 0,
                    last_seen: now,
                    welcomed: false,
                    needs_baseline: false,
                },
            );
        }

        let systems = standard_systems();
        let system_failures = vec![0; systems.len()];
        let started_with = players.len();

        Ok(Session {
            cfg,
            registry,
            recorder,
            systems,
            system_failures,
            conns,
            tick: 0,
            state: SessionState::Created,
            started_with,
            inbound,
            outbound,
            events,
            stop,
        })
    }

    /// Binds the socket task and the simulation thread together and
    /// starts both.
    pub fn start(
        bound: BoundSession,
        players: Vec<SocketAddr>,
        cfg: SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> anyhow::Result<SessionHandle> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<(SocketAddr, Bytes)>(OUTBOUND_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));

        let mut session = Session::new(
            cfg.clone(),
            &players,
            inbound_rx,
            outbound_tx,
            events,
            Arc::clone(&stop),
        )?;
        let port = bound.port;

        let io = tokio::spawn(async move {
            let socket = bound.socket;
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    recv = socket.recv_from(&mut buf) => {
                        match recv {
                            Ok((len, from)) => {
                                // Full queue means the sim is behind;
                                // dropping here mirrors packet loss.
                                let _ = inbound_tx.try_send((from, buf[..len].to_vec()));
                            }
                            Err(err) => {
                                warn!(%err, "session socket recv failed");
                                break;
                            }
                        }
                    }
                    out = outbound_rx.recv() => {
                        let Some((to, bytes)) = out else { break };
                        if let Err(err) = socket.send_to(&bytes, to).await {
                            debug!(%err, %to, "session send failed");
                        }
                    }
                }
            }
        });

        let sim = std::thread::Builder::new()
            .name(format!("session-{}", cfg.room.0))
            .spawn(move || session.run())
            .context("spawn session thread")?;

        Ok(SessionHandle {
            port,
            stop,
            sim: Some(sim),
            io,
        })
    }

    /// Fixed-timestep loop. Late ticks catch up by shortening the next
    /// sleep; a very late loop resyncs instead of bursting.
    pub(crate) fn run(&mut self) {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.cfg.tick_hz.max(1)));
        self.state = SessionState::Running;
        info!(room = self.cfg.room.0, players = self.conns.len(), "session started");

        let mut next = Instant::now() + period;
        while self.state == SessionState::Running {
            if self.stop.load(Ordering::Relaxed) {
                self.state = SessionState::Stopping;
                break;
            }
            self.step();

            let now = Instant::now();
            if now > next + period * 4 {
                next = now + period;
            } else {
                next += period;
                if let Some(wait) = next.checked_duration_since(now) {
                    std::thread::sleep(wait);
                }
            }
        }
        self.finish();
    }

    /// Runs one simulation tick.
    pub(crate) fn step(&mut self) {
        self.drain_inputs();
        self.sweep_timeouts();
        if self.conns.is_empty() {
            debug!(room = self.cfg.room.0, "all clients gone, stopping");
            self.state = SessionState::Stopping;
            return;
        }
        self.apply_inputs();
        self.run_systems();
        for destroyed in self.registry.flush_destroyed() {
            self.recorder.record_destroy(destroyed);
        }
        let over = self.game_over();
        // The final destroys ride the tick's state packet, ahead of any
        // game-over notice, so replicas do not keep dead entities.
        self.broadcast();
        if over {
            let packet = encode_server_packet(&ServerPacket::GameOver { tick: self.tick });
            for addr in self.conns.keys() {
                let _ = self.outbound.try_send((*addr, packet.clone()));
            }
            info!(room = self.cfg.room.0, tick = self.tick, "game over");
            self.state = SessionState::Stopping;
            return;
        }
        self.tick += 1;
    }

    fn drain_inputs(&mut self) {
        while let Ok((from, datagram)) = self.inbound.try_recv() {
            let Some(conn) = self.conns.get_mut(&from) else {
                trace!(%from, "datagram from unknown endpoint");
                continue;
            };
            let Some(ClientPacket::Input(frame)) = decode_client_packet(&datagram) else {
                trace!(%from, "malformed datagram");
                continue;
            };
            conn.last_seen = Instant::now();
            if !conn.welcomed {
                conn.welcomed = true;
                conn.needs_baseline = true;
            }
            if conn.last_seq.is_some_and(|last| frame.seq <= last) {
                continue;
            }
            conn.last_seq = Some(frame.seq);
            conn.buttons = frame.buttons;
        }
    }

    /// Drops clients silent past the timeout and despawns their avatars.
    fn sweep_timeouts(&mut self) {
        let timeout = self.cfg.client_timeout;
        let now = Instant::now();
        let gone: Vec<SocketAddr> = self
            .conns
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_seen) >= timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in gone {
            if let Some(conn) = self.conns.remove(&addr) {
                info!(room = self.cfg.room.0, %addr, "client timed out");
                self.registry.queue_destroy(conn.avatar);
            }
        }
    }

    /// Turns held buttons into avatar velocity and shots.
    fn apply_inputs(&mut self) {
        for conn in self.conns.values_mut() {
            if !self.registry.is_alive(conn.avatar) {
                continue;
            }
            let dir = conn.buttons.direction();
            if dir != Vec2::ZERO {
                conn.facing = dir;
            }
            let wanted = dir * MOVE_SPEED;
            if let Some(vel) = self.registry.get_mut::<Velocity>(conn.avatar) {
                if vel.dx != wanted.x || vel.dy != wanted.y {
                    vel.dx = wanted.x;
                    vel.dy = wanted.y;
                    self.recorder.record_update(
                        conn.avatar,
                        ComponentTag::Velocity,
                        wanted.x,
                        wanted.y,
                    );
                }
            }

            conn.fire_cooldown = conn.fire_cooldown.saturating_sub(1);
            if conn.buttons.contains(Buttons::FIRE) && conn.fire_cooldown == 0 {
                if let Some(&Position { x, y }) = self.registry.get::<Position>(conn.avatar) {
                    let muzzle =
                        Vec2::new(x, y) + conn.facing * (PLAYER_RADIUS + PROJECTILE_RADIUS + 1.0);
                    if let Some(shot) = self.registry.create() {
                        self.registry.add(shot, Position { x: muzzle.x, y: muzzle.y });
                        self.registry.add(
                            shot,
                            Velocity {
                                dx: conn.facing.x * PROJECTILE_SPEED,
                                dy: conn.facing.y * PROJECTILE_SPEED,
                            },
                        );
                        self.registry.add(
                            shot,
                            Projectile {
                                owner: conn.avatar,
                                damage: PROJECTILE_DAMAGE,
                                radius: PROJECTILE_RADIUS,
                            },
                        );
                        self.registry
                            .add(shot, Lifetime { remaining: PROJECTILE_LIFETIME });
                        self.recorder
                            .record_spawn(shot, Archetype::Projectile, muzzle);
                        conn.fire_cooldown = FIRE_COOLDOWN_TICKS;
                    }
                }
            }
        }
    }

    /// Runs every system, containing panics. A faulting system's delta
    /// contribution is rolled back so the tick's packet stays coherent;
    /// repeated faults stop this session without touching its siblings.
    fn run_systems(&mut self) {
        for (i, system) in self.systems.iter_mut().enumerate() {
            let mark = self.recorder.checkpoint();
            let mut ctx = TickCtx {
                registry: &mut self.registry,
                delta: &mut self.recorder,
                dt: 1.0 / self.cfg.tick_hz.max(1) as f32,
                tick: self.tick,
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| system.run(&mut ctx)));
            match outcome {
                Ok(()) => self.system_failures[i] = 0,
                Err(_) => {
                    self.recorder.rollback(mark);
                    self.system_failures[i] += 1;
                    warn!(
                        room = self.cfg.room.0,
                        system = system.name(),
                        failures = self.system_failures[i],
                        "system panicked, tick contribution discarded"
                    );
                    if self.system_failures[i] >= MAX_SYSTEM_FAILURES {
                        warn!(
                            room = self.cfg.room.0,
                            system = system.name(),
                            "system failing persistently, stopping session"
                        );
                        self.state = SessionState::Stopping;
                    }
                }
            }
        }
    }

    fn game_over(&self) -> bool {
        !self.cfg.endless && self.started_with >= 2 && self.registry.count::<Avatar>() <= 1
    }

    /// Full-state snapshot for a newly welcomed client, stamped with the
    /// current tick so later deltas apply cleanly on top.
    fn baseline(&self) -> Bytes {
        let mut recorder = DeltaRecorder::new();
        self.registry.each::<Position>(|e, pos| {
            let archetype = if self.registry.get::<Avatar>(e).is_some() {
                Archetype::Player
            } else if self.registry.get::<Projectile>(e).is_some() {
                Archetype::Projectile
            } else {
                return;
            };
            recorder.record_spawn(e, archetype, Vec2::new(pos.x, pos.y));
        });
        encode_server_packet(&ServerPacket::State {
            tick: self.tick,
            delta: recorder.take(),
        })
    }

    /// Sends the tick's delta to every welcomed client. A client owed its
    /// baseline gets the welcome and snapshot instead, so it never sees
    /// two packets for the same tick.
    fn broadcast(&mut self) {
        let delta = self.recorder.take();
        let state = encode_server_packet(&ServerPacket::State {
            tick: self.tick,
            delta,
        });
        let baseline = self
            .conns
            .values()
            .any(|c| c.welcomed && c.needs_baseline)
            .then(|| self.baseline());
        for (addr, conn) in &mut self.conns {
            if !conn.welcomed {
                continue;
            }
            if conn.needs_baseline {
                conn.needs_baseline = false;
                let welcome = encode_server_packet(&ServerPacket::Welcome {
                    tick: self.tick,
                    avatar: conn.avatar,
                });
                let snapshot = baseline.clone().unwrap_or_else(Bytes::new);
                let _ = self.outbound.try_send((*addr, welcome));
                let _ = self.outbound.try_send((*addr, snapshot));
            } else {
                let _ = self.outbound.try_send((*addr, state.clone()));
            }
        }
    }

    fn finish(&mut self) {
        self.state = SessionState::Stopped;
        info!(room = self.cfg.room.0, tick = self.tick, "session stopped");
        let _ = self
            .events
            .blocking_send(SessionEvent::Stopped { room: self.cfg.room });
    }

    #[cfg(test)]
    fn state(&self) -> SessionState {
        self.state
    }
}
