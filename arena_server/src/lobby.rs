//! Lobby loop.
//!
//! One UDP socket handles every admission request. All room state is
//! owned by this single task, so concurrent joins racing for the last
//! seat of a room resolve in datagram arrival order with no locking.
//!
//! A room's session socket is bound at room creation, before the room
//! fills; the success reply can therefore always carry the final port.
//! Players waiting in an unfilled room get no reply until the room
//! fills or the fill timeout prunes it.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use arena_shared::{
    config::ServerConfig,
    net::{
        decode_lobby_request, encode_lobby_reply, JoinFailureReason, LobbyReply, LobbyRequest,
        MAX_DATAGRAM,
    },
};

use crate::rooms::{Admission, RoomError, RoomId, RoomMode, RoomTable};
use crate::session::{BoundSession, Session, SessionConfig, SessionEvent, SessionHandle};

/// Prune sweep cadence, a fraction of the fill timeout so short
/// timeouts still fire promptly.
fn prune_period(fill_timeout: Duration) -> Duration {
    (fill_timeout / 4).clamp(Duration::from_millis(100), Duration::from_secs(5))
}

/// What the lobby holds for a room, before and after its session starts.
enum RoomRuntime {
    /// Socket bound, waiting for the room to fill.
    Pending(BoundSession),
    Running(SessionHandle),
}

enum Step {
    Datagram(SocketAddr, usize),
    Event(Option<SessionEvent>),
    Prune,
}

/// The lobby process: admission socket plus the table of open rooms.
pub struct Lobby {
    socket: UdpSocket,
    session_ip: IpAddr,
    rooms: RoomTable,
    runtimes: HashMap<RoomId, RoomRuntime>,
    cfg: ServerConfig,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl Lobby {
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(&cfg.lobby_addr)
            .await
            .with_context(|| format!("bind lobby socket {}", cfg.lobby_addr))?;
        let session_ip = socket.local_addr().context("lobby local addr")?.ip();
        let (events_tx, events_rx) = mpsc::channel(64);
        Ok(Lobby {
            socket,
            session_ip,
            rooms: RoomTable::new(cfg.max_rooms),
            runtimes: HashMap::new(),
            cfg,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.socket.local_addr().context("lobby local addr")
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let fill_timeout = Duration::from_millis(self.cfg.room_fill_timeout_ms);
        let mut prune = tokio::time::interval(prune_period(fill_timeout));
        info!(addr = %self.local_addr()?, "lobby listening");

        loop {
            let step = tokio::select! {
                recv = self.socket.recv_from(&mut buf) => {
                    let (len, from) = recv.context("lobby recv")?;
                    Step::Datagram(from, len)
                }
                event = self.events_rx.recv() => Step::Event(event),
                _ = prune.tick() => Step::Prune,
            };
            match step {
                Step::Datagram(from, len) => {
                    let datagram = &buf[..len];
                    let Some(request) = decode_lobby_request(datagram) else {
                        debug!(%from, len, "malformed lobby datagram");
                        continue;
                    };
                    self.handle_request(from, request).await;
                }
                Step::Event(Some(SessionEvent::Stopped { room })) => {
                    info!(room = room.0, "session stopped, closing room");
                    // The thread is joined and the socket released before
                    // the room record goes away.
                    if let Some(RoomRuntime::Running(handle)) = self.runtimes.remove(&room) {
                        handle.shutdown().await;
                    }
                    self.rooms.remove(room);
                }
                // Impossible while the lobby holds its own sender.
                Step::Event(None) => continue,
                Step::Prune => self.prune_stale_rooms(fill_timeout).await,
            }
        }
    }

    async fn handle_request(&mut self, from: SocketAddr, request: LobbyRequest) {
        // Clients resend admission requests while a room fills, and UDP
        // can duplicate them outright. A sender already seated keeps its
        // seat: still-waiting means no reply yet, started means the
        // success reply was lost and is resent.
        if let Some(room) = self.rooms.find_by_member(from) {
            if room.started {
                let port = room.port;
                let reply = encode_lobby_reply(&LobbyReply::JoinSuccess { port });
                if let Err(err) = self.socket.send_to(&reply, from).await {
                    debug!(%err, %from, "join reply resend failed");
                }
            } else {
                debug!(room = room.id.0, %from, "duplicate admission request ignored");
            }
            return;
        }

        let mode = match request {
            LobbyRequest::CreateRoom { private: true } => RoomMode::Private,
            LobbyRequest::CreateRoom { private: false } => RoomMode::Public,
            LobbyRequest::CreateInfinite => RoomMode::Infinite,
            LobbyRequest::Join => {
                if let Some(room) = self.rooms.find_public_with_capacity() {
                    let id = room.id;
                    self.admit(id, from).await;
                    return;
                }
                RoomMode::Public
            }
        };
        match self.open_room(mode).await {
            Ok(id) => self.admit(id, from).await,
            Err(err) => {
                warn!(%err, %from, "room creation failed");
                self.reply_failure(from, JoinFailureReason::ServerFull).await;
            }
        }
    }

    /// Binds the room's session socket and registers the room.
    async fn open_room(&mut self, mode: RoomMode) -> anyhow::Result<RoomId> {
        let bound = BoundSession::bind(self.session_ip).await?;
        let port = bound.port();
        let room = self
            .rooms
            .create(mode, port)
            .context("room cap reached")?;
        let id = room.id;
        self.runtimes.insert(id, RoomRuntime::Pending(bound));
        debug!(room = id.0, ?mode, port, "room opened");
        Ok(id)
    }

    async fn admit(&mut self, id: RoomId, from: SocketAddr) {
        let Some(room) = self.rooms.get_mut(id) else {
            self.reply_failure(from, JoinFailureReason::Internal).await;
            return;
        };
        match room.admit(from) {
            Ok(Admission::Waiting) => {
                debug!(room = id.0, %from, waiting = room.members.len(), "player admitted");
            }
            Ok(Admission::Filled) => {
                let port = room.port;
                let members = room.members.clone();
                let endless = room.mode == RoomMode::Infinite;
                if let Err(err) = self.start_session(id, members.clone(), endless) {
                    warn!(%err, room = id.0, "session start failed");
                    self.rooms.remove(id);
                    self.runtimes.remove(&id);
                    for member in members {
                        self.reply_failure(member, JoinFailureReason::Internal).await;
                    }
                    return;
                }
                info!(room = id.0, port, players = members.len(), "room filled, session started");
                let reply = encode_lobby_reply(&LobbyReply::JoinSuccess { port });
                for member in members {
                    if let Err(err) = self.socket.send_to(&reply, member).await {
                        debug!(%err, %member, "join reply failed");
                    }
                }
            }
            Err(RoomError::AlreadyMember) => {
                debug!(room = id.0, %from, "duplicate join ignored");
            }
            Err(RoomError::Full | RoomError::Started) => {
                self.reply_failure(from, JoinFailureReason::ServerFull).await;
            }
        }
    }

    fn start_session(
        &mut self,
        id: RoomId,
        members: Vec<SocketAddr>,
        endless: bool,
    ) -> anyhow::Result<()> {
        let Some(RoomRuntime::Pending(bound)) = self.runtimes.remove(&id) else {
            anyhow::bail!("room {} has no pending socket", id.0);
        };
        let cfg = SessionConfig {
            room: id,
            tick_hz: self.cfg.tick_hz,
            client_timeout: Duration::from_millis(self.cfg.client_timeout_ms),
            endless,
        };
        let handle = Session::start(bound, members, cfg, self.events_tx.clone())?;
        self.runtimes.insert(id, RoomRuntime::Running(handle));
        Ok(())
    }

    /// Closes rooms that never filled and tells their waiting members.
    async fn prune_stale_rooms(&mut self, fill_timeout: Duration) {
        let now = Instant::now();
        for id in self.rooms.stale_unstarted(now, fill_timeout) {
            let Some(room) = self.rooms.remove(id) else {
                continue;
            };
            self.runtimes.remove(&id);
            info!(room = id.0, waited = room.members.len(), "room never filled, pruned");
            for member in room.members {
                self.reply_failure(member, JoinFailureReason::Timeout).await;
            }
        }
    }

    async fn reply_failure(&self, to: SocketAddr, reason: JoinFailureReason) {
        let reply = encode_lobby_reply(&LobbyReply::JoinFailure { reason });
        if let Err(err) = self.socket.send_to(&reply, to).await {
            debug!(%err, %to, "failure reply not sent");
        }
    }
}
