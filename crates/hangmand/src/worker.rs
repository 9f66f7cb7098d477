//! Session worker: drives the handshake for one connected player.
//!
//! One task per connection. The task reads client lines and, in the same
//! `select!`, drains the connection's outbox: notices queued by matches and
//! listing pushes from the directory. Replies to the player's own requests
//! are written directly.
//!
//! State machine: HELLO_EXPECTED → AWAITING_ROLE → ROLE_SELECTED → HANDOFF.
//! A disconnect before handoff gets the same cleanup as EXIT.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use hangman_core::wire::{ClientFrame, MatchSummary, ServerFrame};
use hangman_services::{
    ConnId, GuesserHandle, JoinError, Match, MatchState, Outbox, PushError, PushSink,
};

use crate::ServerContext;

/// Frames queued for one connection before pushes to it start failing.
const OUTBOX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    HelloExpected,
    AwaitingRole,
    RoleSelected,
    Handoff,
}

enum Role {
    Master(Arc<Match>),
    Guesser(Arc<Match>),
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Handoff,
    Exit,
    Rejected,
    Disconnected,
    Fatal,
}

enum Flow {
    Continue,
    Close(Ending),
}

/// Listing pushes for one identity, written on its handshake connection.
struct ConnectionSink {
    outbox: Outbox,
}

impl PushSink for ConnectionSink {
    fn notify(&self, identity: &str, listing: &[MatchSummary]) -> Result<(), PushError> {
        self.outbox
            .try_send(ServerFrame::MatchList {
                matches: listing.to_vec(),
            })
            .map_err(|_| PushError::Gone(identity.to_string()))
    }
}

pub struct SessionWorker {
    conn: ConnId,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    state: HandshakeState,
    identity: Option<String>,
    registered: bool,
    role: Option<Role>,
}

impl SessionWorker {
    pub fn new(conn: ConnId, peer: SocketAddr, ctx: Arc<ServerContext>) -> Self {
        Self {
            conn,
            peer,
            ctx,
            state: HandshakeState::HelloExpected,
            identity: None,
            registered: false,
            role: None,
        }
    }

    fn who(&self) -> &str {
        self.identity.as_deref().unwrap_or("-")
    }

    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        let (outbox, mut queued) = mpsc::channel::<ServerFrame>(OUTBOX_DEPTH);
        let mut replies = Vec::new();

        let ending = loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break Ending::Disconnected,
                        Err(e) => {
                            tracing::warn!(conn = %self.conn, error = %e, "handshake read failed");
                            break Ending::Disconnected;
                        }
                    };

                    let flow = self.handle_line(&line, &outbox, &mut replies).await;
                    if let Err(e) = write_all(&mut writer, replies.drain(..)).await {
                        tracing::warn!(conn = %self.conn, error = %e, "handshake write failed");
                        break Ending::Disconnected;
                    }
                    if let Flow::Close(ending) = flow {
                        break ending;
                    }
                }

                Some(frame) = queued.recv() => {
                    if let Err(e) = write_all(&mut writer, std::iter::once(frame)).await {
                        tracing::warn!(conn = %self.conn, error = %e, "handshake write failed");
                        break Ending::Disconnected;
                    }
                }
            }
        };

        self.finish(ending).await;

        // Notices queued before the close still go out.
        let mut pending = Vec::new();
        while let Ok(frame) = queued.try_recv() {
            pending.push(frame);
        }
        if let Err(e) = write_all(&mut writer, pending).await {
            tracing::debug!(conn = %self.conn, error = %e, "final flush failed");
        }
        let _ = writer.shutdown().await;
    }

    async fn handle_line(
        &mut self,
        line: &str,
        outbox: &Outbox,
        replies: &mut Vec<ServerFrame>,
    ) -> Flow {
        let frame = match ClientFrame::parse(line) {
            Ok(frame) => frame,
            Err(e) if self.state == HandshakeState::HelloExpected => {
                tracing::warn!(peer = %self.peer, error = %e, "bad first frame, closing");
                return Flow::Close(Ending::Fatal);
            }
            Err(e) => {
                tracing::warn!(identity = %self.who(), error = %e, "bad frame discarded");
                return Flow::Continue;
            }
        };

        match (self.state, frame) {
            (HandshakeState::HelloExpected, ClientFrame::Hello { identity }) => {
                self.on_hello(identity, outbox, replies).await
            }
            (HandshakeState::HelloExpected, other) => {
                tracing::warn!(peer = %self.peer, frame = ?other, "expected HELLO, closing");
                Flow::Close(Ending::Fatal)
            }
            (HandshakeState::AwaitingRole, ClientFrame::Master { capacity }) => {
                self.on_master(capacity, outbox, replies).await
            }
            (HandshakeState::AwaitingRole, ClientFrame::Guesser { master }) => {
                self.on_guesser(master, outbox, replies).await
            }
            (_, ClientFrame::StartMatch) => self.on_start().await,
            (_, ClientFrame::Exit) => {
                tracing::info!(identity = %self.who(), "exit requested");
                self.withdraw().await;
                Flow::Close(Ending::Exit)
            }
            (state, other) => {
                tracing::debug!(identity = %self.who(), ?state, frame = ?other, "unexpected frame discarded");
                Flow::Continue
            }
        }
    }

    async fn on_hello(
        &mut self,
        identity: String,
        outbox: &Outbox,
        replies: &mut Vec<ServerFrame>,
    ) -> Flow {
        let sink = Arc::new(ConnectionSink {
            outbox: outbox.clone(),
        });
        if !self.ctx.directory.register(&identity, sink) {
            tracing::warn!(%identity, peer = %self.peer, "identity already connected, refusing");
            return Flow::Close(Ending::Rejected);
        }

        tracing::info!(%identity, conn = %self.conn, peer = %self.peer, "player connected");
        self.identity = Some(identity);
        self.registered = true;
        self.state = HandshakeState::AwaitingRole;

        replies.push(ServerFrame::MatchList {
            matches: self.ctx.registry.snapshot().await,
        });
        Flow::Continue
    }

    async fn on_master(
        &mut self,
        capacity: usize,
        outbox: &Outbox,
        replies: &mut Vec<ServerFrame>,
    ) -> Flow {
        let identity = self.who().to_string();
        match self
            .ctx
            .registry
            .create(&identity, capacity, outbox.clone())
            .await
        {
            Ok(m) => {
                self.ctx.directory.record_in_match(&identity, true);
                replies.push(ServerFrame::MatchCreated(m.channel().clone()));
                self.role = Some(Role::Master(m));
                self.state = HandshakeState::RoleSelected;
                self.ctx.push_listing().await;
                Flow::Continue
            }
            Err(e) => {
                tracing::info!(%identity, error = %e, "match refused");
                replies.push(ServerFrame::NoMoreMatch);
                Flow::Close(Ending::Rejected)
            }
        }
    }

    async fn on_guesser(
        &mut self,
        master: String,
        outbox: &Outbox,
        replies: &mut Vec<ServerFrame>,
    ) -> Flow {
        let identity = self.who().to_string();
        let Some(m) = self.ctx.registry.lookup(&master).await else {
            tracing::info!(%identity, %master, "no such match");
            replies.push(ServerFrame::MasterDoesntExist);
            return Flow::Close(Ending::Rejected);
        };

        let handle = GuesserHandle {
            conn: self.conn,
            identity: identity.clone(),
            outbox: outbox.clone(),
        };
        match m.join(handle).await {
            Ok(joined) => {
                tracing::info!(%identity, %master, joined, capacity = m.capacity(), "added to match");
                self.ctx.directory.record_in_match(&identity, true);
                replies.push(ServerFrame::AddedToMatch);
                self.role = Some(Role::Guesser(m));
                self.state = HandshakeState::RoleSelected;
                self.ctx.push_listing().await;
                Flow::Continue
            }
            Err(e) => {
                tracing::info!(%identity, %master, error = %e, "join refused");
                replies.push(match e {
                    JoinError::Closed => ServerFrame::MatchAlreadyClosed,
                    JoinError::Full => ServerFrame::MatchFull,
                });
                Flow::Close(Ending::Rejected)
            }
        }
    }

    async fn on_start(&mut self) -> Flow {
        match self.role.take() {
            Some(Role::Master(m)) => {
                m.force_start().await;
                self.ctx.registry.remove(m.master()).await;
                self.hold_channel(m);
                self.ctx.push_listing().await;
            }
            Some(Role::Guesser(m)) => {
                if m.state().await != MatchState::Active {
                    tracing::warn!(identity = %self.who(), "START_MATCH before the match started discarded");
                    self.role = Some(Role::Guesser(m));
                    return Flow::Continue;
                }
                tracing::debug!(identity = %self.who(), "guesser handed off");
            }
            None => {
                tracing::debug!(identity = %self.who(), "START_MATCH without a role discarded");
                return Flow::Continue;
            }
        }
        self.state = HandshakeState::Handoff;
        Flow::Close(Ending::Handoff)
    }

    /// Keep the started match's channel leased for the whole game window,
    /// then close the match and give the channel back. The coordinator never
    /// learns when a game ends, so a game solved in seconds still occupies
    /// its pool slot for the full `match_secs + release_grace_secs`.
    fn hold_channel(&self, m: Arc<Match>) {
        let hold = self.ctx.game.lease_duration();
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            m.finish().await;
            tracing::info!(master = %m.master(), "game window over, channel released");
        });
    }

    /// Undo this player's part in a forming match.
    async fn withdraw(&mut self) {
        match self.role.take() {
            Some(Role::Master(m)) => {
                self.ctx.registry.remove(m.master()).await;
                m.abort_and_notify().await;
            }
            Some(Role::Guesser(m)) => {
                m.leave(self.conn).await;
            }
            None => return,
        }
        self.ctx.push_listing().await;
    }

    async fn finish(&mut self, ending: Ending) {
        if self.registered {
            if let Some(identity) = &self.identity {
                self.ctx.directory.remove(identity);
            }
        }
        if ending == Ending::Disconnected && self.role.is_some() {
            tracing::info!(identity = %self.who(), "disconnected before handoff, cleaning up");
            self.withdraw().await;
        }
        tracing::info!(identity = %self.who(), conn = %self.conn, ?ending, "connection closed");
    }
}

async fn write_all<W, I>(writer: &mut W, frames: I) -> Result<()>
where
    W: AsyncWrite + Unpin,
    I: IntoIterator<Item = ServerFrame>,
{
    let mut buf = String::new();
    for frame in frames {
        buf.push_str(&frame.encode().context("encode server frame")?);
        buf.push('\n');
    }
    if buf.is_empty() {
        return Ok(());
    }
    writer
        .write_all(buf.as_bytes())
        .await
        .context("write to handshake connection")?;
    writer.flush().await.context("flush handshake connection")?;
    Ok(())
}
