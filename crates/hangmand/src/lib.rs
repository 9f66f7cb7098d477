//! hangmand: match coordinator.
//!
//! Accepts handshake connections and runs one session worker per player.
//! All shared state lives in a [`ServerContext`] handed to every worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use hangman_core::config::{GameConfig, HangmanConfig};
use hangman_services::{ChannelAllocator, ConnId, Directory, MatchRegistry};

pub mod worker;

/// Everything a session worker needs, shared across connections.
pub struct ServerContext {
    pub registry: Arc<MatchRegistry>,
    pub directory: Arc<Directory>,
    pub game: GameConfig,
    next_conn: AtomicU64,
}

impl ServerContext {
    pub fn new(config: &HangmanConfig) -> Arc<Self> {
        let allocator = ChannelAllocator::from_config(&config.channels);
        let registry = Arc::new(MatchRegistry::new(config.server.max_matches, allocator));
        Self::from_parts(registry, Arc::new(Directory::new()), config.game.clone())
    }

    pub fn from_parts(
        registry: Arc<MatchRegistry>,
        directory: Arc<Directory>,
        game: GameConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            directory,
            game,
            next_conn: AtomicU64::new(1),
        })
    }

    fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }

    /// Push the current open-match listing to every free identity.
    pub async fn push_listing(&self) {
        let listing = self.registry.snapshot().await;
        let delivered = self.directory.push_listing(&listing);
        tracing::debug!(matches = listing.len(), delivered, "listing pushed");
    }
}

/// Accept handshake connections until shutdown. One task per connection.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "handshake listener ready");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("handshake listener shutting down");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let conn = ctx.next_conn_id();
                tracing::debug!(%peer, %conn, "connection accepted");
                tokio::spawn(worker::SessionWorker::new(conn, peer, Arc::clone(&ctx)).run(stream));
            }
        }
    }
}
