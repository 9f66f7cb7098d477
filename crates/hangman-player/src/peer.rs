//! Peer session: the player's side of the handshake, and the sealed
//! gameplay channel it hands off to.
//!
//! A session starts WAITING: it says HELLO, asks for its role, and waits for
//! the match to form. The formation timer bounds that wait. `handoff`
//! consumes the session, closes the handshake connection, and yields the
//! match key exactly once.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use hangman_core::crypto::FieldCipher;
use hangman_core::wire::{ChannelInfo, ClientFrame, MatchSummary, ServerFrame};
use hangman_core::GameMessage;

use crate::timer::Deadline;
use crate::transport::GameTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master { capacity: usize },
    Guesser { master: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Waiting,
    Active,
}

/// A request the coordinator turned down.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Refusal {
    #[error("the server cannot host more matches")]
    NoMoreMatch,
    #[error("the selected match is full")]
    MatchFull,
    #[error("the selected match is already closed")]
    MatchAlreadyClosed,
    #[error("the selected match does not exist")]
    MasterDoesntExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    Listing(Vec<MatchSummary>),
    /// Master only. The channel is kept for an early start.
    MatchCreated(ChannelInfo),
    AddedToMatch,
    /// The match is starting on this channel: call [`PeerSession::handoff`].
    Start(ChannelInfo),
    Refused(Refusal),
    /// The master left before the start. EXIT has been sent.
    MatchClosed,
    /// Nobody started the match in time. EXIT has been sent.
    FormationTimeout,
    ServerGone,
}

pub struct PeerSession {
    identity: String,
    role: Role,
    state: PeerState,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    formation: Deadline,
    channel: Option<ChannelInfo>,
    done: bool,
}

impl PeerSession {
    /// Connect, say HELLO, and ask for `role`.
    pub async fn connect(
        server: SocketAddr,
        identity: &str,
        role: Role,
        formation: Duration,
    ) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("failed to connect to coordinator at {server}"))?;
        let (read_half, writer) = stream.into_split();

        let mut session = Self {
            identity: identity.to_string(),
            role: role.clone(),
            state: PeerState::Waiting,
            lines: BufReader::new(read_half).lines(),
            writer,
            formation: Deadline::new(formation),
            channel: None,
            done: false,
        };

        session
            .send(&ClientFrame::Hello {
                identity: identity.to_string(),
            })
            .await?;
        let request = match role {
            Role::Master { capacity } => ClientFrame::Master { capacity },
            Role::Guesser { master } => ClientFrame::Guesser { master },
        };
        session.send(&request).await?;

        tracing::debug!(identity, %server, "handshake started");
        Ok(session)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// The channel announced in MATCH_CREATED, once received.
    pub fn channel(&self) -> Option<&ChannelInfo> {
        self.channel.as_ref()
    }

    async fn send(&mut self, frame: &ClientFrame) -> Result<()> {
        let line = format!("{}\n", frame.encode());
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("handshake write failed")
    }

    async fn close(&mut self) {
        self.done = true;
        self.formation.stop();
        let _ = self.writer.shutdown().await;
    }

    /// Leave the forming match.
    pub async fn exit(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        let sent = self.send(&ClientFrame::Exit).await;
        self.close().await;
        sent
    }

    /// Wait for the next handshake event.
    pub async fn next_event(&mut self) -> Result<HandshakeEvent> {
        if self.done {
            return Ok(HandshakeEvent::ServerGone);
        }

        loop {
            tokio::select! {
                _ = self.formation.expired() => {
                    tracing::info!(identity = %self.identity, "match did not start in time, leaving");
                    if let Err(e) = self.send(&ClientFrame::Exit).await {
                        tracing::debug!(error = %e, "exit after formation timeout not sent");
                    }
                    self.close().await;
                    return Ok(HandshakeEvent::FormationTimeout);
                }

                line = self.lines.next_line() => {
                    let Some(line) = line.context("handshake read failed")? else {
                        self.close().await;
                        return Ok(HandshakeEvent::ServerGone);
                    };
                    let frame = match ServerFrame::decode(&line) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(error = %e, "bad server frame discarded");
                            continue;
                        }
                    };
                    if let Some(event) = self.on_frame(frame).await {
                        return Ok(event);
                    }
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: ServerFrame) -> Option<HandshakeEvent> {
        let refused = |r| Some(HandshakeEvent::Refused(r));
        let event = match frame {
            ServerFrame::MatchList { matches } => return Some(HandshakeEvent::Listing(matches)),
            ServerFrame::MatchCreated(info) => {
                self.channel = Some(info.clone());
                self.formation.arm();
                return Some(HandshakeEvent::MatchCreated(info));
            }
            ServerFrame::AddedToMatch => {
                self.formation.arm();
                return Some(HandshakeEvent::AddedToMatch);
            }
            ServerFrame::StartMatch(info) => return Some(HandshakeEvent::Start(info)),
            ServerFrame::MatchClosed => {
                if let Err(e) = self.send(&ClientFrame::Exit).await {
                    tracing::debug!(error = %e, "exit after match closed not sent");
                }
                Some(HandshakeEvent::MatchClosed)
            }
            ServerFrame::NoMoreMatch => refused(Refusal::NoMoreMatch),
            ServerFrame::MatchFull => refused(Refusal::MatchFull),
            ServerFrame::MatchAlreadyClosed => refused(Refusal::MatchAlreadyClosed),
            ServerFrame::MasterDoesntExist => refused(Refusal::MasterDoesntExist),
        };
        self.close().await;
        event
    }

    /// Close the handshake and switch to the gameplay channel.
    pub async fn handoff(mut self, channel: ChannelInfo) -> Result<ActiveSession> {
        self.formation.stop();
        if let Err(e) = self.send(&ClientFrame::StartMatch).await {
            tracing::warn!(identity = %self.identity, error = %e, "start notice not sent");
        }
        self.close().await;

        let cipher = FieldCipher::from_secret(&channel.key).context("match key unusable")?;
        tracing::info!(identity = %self.identity, address = %channel.address, port = channel.port, "handed off to gameplay channel");

        Ok(ActiveSession {
            identity: self.identity,
            state: PeerState::Active,
            channel,
            cipher,
        })
    }
}

/// A player after handoff: its identity, channel and match key.
#[derive(Debug)]
pub struct ActiveSession {
    pub identity: String,
    state: PeerState,
    pub channel: ChannelInfo,
    pub cipher: FieldCipher,
}

impl ActiveSession {
    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn attach<T: GameTransport>(self, transport: T) -> (String, GameChannel<T>) {
        (self.identity, GameChannel::new(transport, self.cipher))
    }
}

// ── Sealed gameplay channel ───────────────────────────────────────────────────

/// A gameplay transport plus the match key. Everything sent is sealed, and
/// anything that does not open under the key is dropped on receipt.
pub struct GameChannel<T> {
    transport: T,
    cipher: FieldCipher,
}

impl<T: GameTransport> GameChannel<T> {
    pub fn new(transport: T, cipher: FieldCipher) -> Self {
        Self { transport, cipher }
    }

    pub fn seal(&self, msg: &GameMessage) -> Result<Vec<u8>> {
        msg.seal(&self.cipher).context("failed to seal gameplay message")
    }

    pub async fn broadcast_sealed(&self, datagram: &[u8]) -> Result<()> {
        self.transport
            .broadcast(datagram)
            .await
            .context("gameplay broadcast failed")
    }

    pub async fn broadcast(&self, msg: &GameMessage) -> Result<()> {
        let datagram = self.seal(msg)?;
        self.broadcast_sealed(&datagram).await
    }

    pub async fn send_to(&self, msg: &GameMessage, to: SocketAddr) -> Result<()> {
        let datagram = self.seal(msg)?;
        self.transport
            .send_to(&datagram, to)
            .await
            .with_context(|| format!("gameplay unicast to {to} failed"))
    }

    /// Next message that opens under the match key. Cancel-safe.
    pub async fn recv(&self) -> std::io::Result<(GameMessage, SocketAddr)> {
        loop {
            let (datagram, from) = self.transport.recv().await?;
            match GameMessage::open(&datagram, &self.cipher) {
                Ok(msg) => return Ok((msg, from)),
                Err(e) => tracing::trace!(%from, error = %e, "datagram discarded"),
            }
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn leave(&self) {
        if let Err(e) = self.transport.leave() {
            tracing::debug!(error = %e, "leaving gameplay channel failed");
        }
    }
}
