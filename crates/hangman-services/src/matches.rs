//! A single match while it forms on the handshake side.
//!
//! The match owns the output handles of its joined guessers and the channel
//! lease it was created with. All mutation goes through one lock scoped to
//! this match, so concurrent matches never contend. The lease is only ever
//! dropped after that lock is released, so the allocator lock never nests
//! inside it.
//!
//! Notices to peers are non-blocking sends into bounded per-connection
//! queues. A full or closed queue means that peer is gone: the notice is
//! dropped and the loop moves on.

use tokio::sync::{mpsc, Mutex};

use hangman_core::wire::{ChannelInfo, MatchSummary, ServerFrame};
use thiserror::Error;

use crate::channel::ChannelLease;

/// Output side of one handshake connection.
pub type Outbox = mpsc::Sender<ServerFrame>;

/// Process-unique id of a handshake connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A joined guesser as seen by its match.
#[derive(Debug, Clone)]
pub struct GuesserHandle {
    pub conn: ConnId,
    pub identity: String,
    pub outbox: Outbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// Accepting guessers.
    Open,
    /// Capacity reached, the master has been told to start.
    Started,
    /// Start notices sent, players handed off to the gameplay channel.
    Active,
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("match already closed")]
    Closed,
    #[error("match is full")]
    Full,
}

struct MatchInner {
    guessers: Vec<GuesserHandle>,
    state: MatchState,
    lease: Option<ChannelLease>,
}

pub struct Match {
    master: String,
    capacity: usize,
    channel: ChannelInfo,
    master_out: Outbox,
    inner: Mutex<MatchInner>,
}

impl Match {
    pub fn new(master: String, capacity: usize, master_out: Outbox, lease: ChannelLease) -> Self {
        Self {
            master,
            capacity,
            channel: lease.channel().clone(),
            master_out,
            inner: Mutex::new(MatchInner {
                guessers: Vec::with_capacity(capacity),
                state: MatchState::Open,
                lease: Some(lease),
            }),
        }
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The gameplay channel this match was bound to at creation.
    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    /// Add a guesser. When this join fills the match the master is sent the
    /// start notice right away.
    pub async fn join(&self, handle: GuesserHandle) -> Result<usize, JoinError> {
        let mut inner = self.inner.lock().await;

        if matches!(inner.state, MatchState::Active | MatchState::Closed) {
            return Err(JoinError::Closed);
        }
        if inner.guessers.len() >= self.capacity {
            return Err(JoinError::Full);
        }

        tracing::debug!(master = %self.master, guesser = %handle.identity, conn = %handle.conn, "guesser joined");
        inner.guessers.push(handle);
        let joined = inner.guessers.len();

        if joined == self.capacity {
            inner.state = MatchState::Started;
            tracing::info!(master = %self.master, capacity = self.capacity, "match full, notifying master");
            deliver(&self.master_out, &self.master, ServerFrame::StartMatch(self.channel.clone()));
        }

        Ok(joined)
    }

    /// Send the start notice to every joined guesser and close the match to
    /// further joins. Returns how many notices were handed off.
    pub async fn force_start(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let frame = ServerFrame::StartMatch(self.channel.clone());
        let sent = inner
            .guessers
            .iter()
            .filter(|g| deliver(&g.outbox, &g.identity, frame.clone()))
            .count();
        inner.state = MatchState::Active;
        tracing::info!(master = %self.master, notified = sent, "match started");
        sent
    }

    /// Tell every joined guesser the match is gone, close it and give the
    /// channel back to the pool.
    pub async fn abort_and_notify(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let sent = inner
            .guessers
            .iter()
            .filter(|g| deliver(&g.outbox, &g.identity, ServerFrame::MatchClosed))
            .count();
        inner.state = MatchState::Closed;
        let lease = inner.lease.take();
        drop(inner);
        drop(lease);
        tracing::info!(master = %self.master, notified = sent, "match aborted");
        sent
    }

    /// Remove one guesser. Open/closed status is unchanged.
    pub async fn leave(&self, conn: ConnId) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.guessers.len();
        inner.guessers.retain(|g| g.conn != conn);
        let removed = inner.guessers.len() != before;
        if removed {
            tracing::debug!(master = %self.master, %conn, "guesser left");
        }
        removed
    }

    /// Mark the match closed and release its channel.
    pub async fn finish(&self) {
        let lease = {
            let mut inner = self.inner.lock().await;
            inner.state = MatchState::Closed;
            inner.lease.take()
        };
        if let Some(lease) = lease {
            tracing::debug!(master = %self.master, slot = lease.index(), "match closed, releasing channel");
        }
    }

    pub async fn state(&self) -> MatchState {
        self.inner.lock().await.state
    }

    pub async fn joined(&self) -> usize {
        self.inner.lock().await.guessers.len()
    }

    pub async fn is_closed(&self) -> bool {
        matches!(
            self.inner.lock().await.state,
            MatchState::Active | MatchState::Closed
        )
    }

    /// Index of the channel slot still held, if any.
    pub async fn slot(&self) -> Option<usize> {
        self.inner.lock().await.lease.as_ref().map(ChannelLease::index)
    }

    pub async fn summary(&self) -> MatchSummary {
        MatchSummary {
            master: self.master.clone(),
            joined: self.joined().await,
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Match")
            .field("master", &self.master)
            .field("capacity", &self.capacity)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

fn deliver(out: &Outbox, to: &str, frame: ServerFrame) -> bool {
    let tag = frame.tag();
    match out.try_send(frame) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(peer = %to, %tag, error = %e, "notice dropped, peer is gone");
            false
        }
    }
}
