//! Headless client.
//!
//! Handshake: send one lobby request, wait for the reply (resending on
//! timeout, since both directions can drop), then switch all traffic to
//! the session port the reply names. A room that has not filled yet
//! simply leaves the client waiting in the retry loop.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context as _};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use arena_shared::{
    input::{Buttons, InputFrame},
    net::{
        decode_lobby_reply, decode_server_packet, encode_client_packet, encode_lobby_request,
        ClientPacket, LobbyReply, LobbyRequest, MAX_DATAGRAM,
    },
};

use crate::replica::Replica;

/// How the client wants to be placed in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Create { private: bool },
    QuickJoin,
    Infinite,
}

impl ClientMode {
    fn request(self) -> LobbyRequest {
        match self {
            ClientMode::Create { private } => LobbyRequest::CreateRoom { private },
            ClientMode::QuickJoin => LobbyRequest::Join,
            ClientMode::Infinite => LobbyRequest::CreateInfinite,
        }
    }
}

/// A connected (or connecting) game client.
pub struct GameClient {
    socket: UdpSocket,
    session_addr: Option<SocketAddr>,
    seq: u32,
    pub replica: Replica,
}

impl GameClient {
    pub async fn new() -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("bind client socket")?;
        Ok(GameClient {
            socket,
            session_addr: None,
            seq: 0,
            replica: Replica::new(),
        })
    }

    /// Runs the lobby handshake until admitted or `deadline` elapses.
    /// The request is resent every retry period while waiting.
    pub async fn join(
        &mut self,
        lobby: SocketAddr,
        mode: ClientMode,
        deadline: Duration,
    ) -> anyhow::Result<SocketAddr> {
        let request = encode_lobby_request(&mode.request());
        let mut buf = [0u8; MAX_DATAGRAM];
        let retry = Duration::from_millis(500);
        let give_up = tokio::time::Instant::now() + deadline;

        self.socket
            .send_to(&request, lobby)
            .await
            .context("send lobby request")?;

        loop {
            let recv = tokio::time::timeout_at(
                give_up.min(tokio::time::Instant::now() + retry),
                self.socket.recv_from(&mut buf),
            )
            .await;
            match recv {
                Ok(result) => {
                    let (len, from) = result.context("lobby recv")?;
                    if from != lobby {
                        continue;
                    }
                    match decode_lobby_reply(&buf[..len]) {
                        Some(LobbyReply::JoinSuccess { port }) => {
                            let session = SocketAddr::new(lobby.ip(), port);
                            info!(%session, "admitted");
                            self.session_addr = Some(session);
                            // First input doubles as the hello that earns
                            // the welcome and baseline.
                            self.send_input(Buttons::empty()).await?;
                            return Ok(session);
                        }
                        Some(LobbyReply::JoinFailure { reason }) => {
                            bail!("join rejected: {:?}", reason);
                        }
                        None => {
                            debug!(%from, len, "unexpected lobby datagram");
                        }
                    }
                }
                Err(_) if tokio::time::Instant::now() >= give_up => {
                    bail!("lobby did not admit within {:?}", deadline);
                }
                Err(_) => {
                    // Retry period elapsed; the request may have been lost.
                    self.socket
                        .send_to(&request, lobby)
                        .await
                        .context("resend lobby request")?;
                }
            }
        }
    }

    /// Sends the currently held buttons with the next sequence number.
    pub async fn send_input(&mut self, buttons: Buttons) -> anyhow::Result<()> {
        let Some(session) = self.session_addr else {
            bail!("not in a session");
        };
        self.seq += 1;
        let packet = encode_client_packet(&ClientPacket::Input(InputFrame {
            seq: self.seq,
            buttons,
        }));
        self.socket
            .send_to(&packet, session)
            .await
            .context("send input")?;
        Ok(())
    }

    /// Applies every server packet that arrives within `window`.
    /// Returns how many packets were applied (stale ones excluded).
    pub async fn pump(&mut self, window: Duration) -> anyhow::Result<usize> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let until = tokio::time::Instant::now() + window;
        let mut applied = 0;
        loop {
            let recv = tokio::time::timeout_at(until, self.socket.recv_from(&mut buf)).await;
            let Ok(result) = recv else {
                return Ok(applied);
            };
            let (len, from) = result.context("session recv")?;
            if Some(from) != self.session_addr {
                continue;
            }
            let Some(packet) = decode_server_packet(&buf[..len]) else {
                debug!(len, "malformed server packet");
                continue;
            };
            if self.replica.apply(&packet) {
                applied += 1;
            }
        }
    }

    pub fn session_addr(&self) -> Option<SocketAddr> {
        self.session_addr
    }
}
