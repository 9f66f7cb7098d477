//! Identity directory: who is connected, and who is free to see listings.
//!
//! Each registered identity carries a push sink. Listing pushes go to every
//! identity not currently in a match; a sink that fails is taken as a player
//! who has gone away and is pruned.

use std::sync::Arc;

use dashmap::DashMap;
use hangman_core::wire::MatchSummary;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("listener {0} is gone")]
    Gone(String),
}

/// Best-effort delivery of a match listing to one identity.
pub trait PushSink: Send + Sync {
    fn notify(&self, identity: &str, listing: &[MatchSummary]) -> Result<(), PushError>;
}

struct DirectoryEntry {
    in_match: bool,
    sink: Arc<dyn PushSink>,
}

/// What the directory knows about a connected identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityStatus {
    pub in_match: bool,
}

#[derive(Default)]
pub struct Directory {
    entries: DashMap<String, DirectoryEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity. Returns false if it is already connected.
    pub fn register(&self, identity: &str, sink: Arc<dyn PushSink>) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(identity.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(DirectoryEntry {
                    in_match: false,
                    sink,
                });
                true
            }
        }
    }

    pub fn check_identity(&self, identity: &str) -> Option<IdentityStatus> {
        self.entries.get(identity).map(|e| IdentityStatus {
            in_match: e.in_match,
        })
    }

    pub fn record_in_match(&self, identity: &str, in_match: bool) {
        if let Some(mut e) = self.entries.get_mut(identity) {
            e.in_match = in_match;
        }
    }

    pub fn remove(&self, identity: &str) -> bool {
        self.entries.remove(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Push `listing` to every identity not in a match. Returns how many
    /// pushes were delivered.
    pub fn push_listing(&self, listing: &[MatchSummary]) -> usize {
        // Collect first so no shard lock is held across a sink call.
        let targets: Vec<(String, Arc<dyn PushSink>)> = self
            .entries
            .iter()
            .filter(|e| !e.in_match)
            .map(|e| (e.key().clone(), Arc::clone(&e.sink)))
            .collect();

        let mut delivered = 0;
        for (identity, sink) in targets {
            match sink.notify(&identity, listing) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "listing push failed, pruning");
                    self.entries.remove(&identity);
                }
            }
        }
        delivered
    }
}
