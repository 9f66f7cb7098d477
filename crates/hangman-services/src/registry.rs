//! Match registry: maps a master's identity to its forming match.
//!
//! The map lock is never held while a per-match lock is taken: `snapshot`
//! clones the match handles out first and queries them afterwards. Lock
//! order on `create` is registry, then allocator.

use std::collections::BTreeMap;
use std::sync::Arc;

use hangman_core::wire::MatchSummary;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::channel::{AllocError, ChannelAllocator};
use crate::matches::{Match, Outbox};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("match limit of {0} reached")]
    PoolFull(usize),
    #[error("{0} already hosts a match")]
    AlreadyHosting(String),
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

pub struct MatchRegistry {
    max_matches: usize,
    allocator: Arc<ChannelAllocator>,
    matches: Mutex<BTreeMap<String, Arc<Match>>>,
}

impl MatchRegistry {
    pub fn new(max_matches: usize, allocator: Arc<ChannelAllocator>) -> Self {
        Self {
            max_matches,
            allocator,
            matches: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn allocator(&self) -> &Arc<ChannelAllocator> {
        &self.allocator
    }

    pub fn max_matches(&self) -> usize {
        self.max_matches
    }

    /// Register a new match for `master`, bound to a freshly acquired channel.
    pub async fn create(
        &self,
        master: &str,
        capacity: usize,
        master_out: Outbox,
    ) -> Result<Arc<Match>, RegistryError> {
        let mut matches = self.matches.lock().await;

        if matches.contains_key(master) {
            return Err(RegistryError::AlreadyHosting(master.to_string()));
        }
        if matches.len() >= self.max_matches {
            return Err(RegistryError::PoolFull(self.max_matches));
        }

        let lease = self.allocator.acquire()?;
        let slot = lease.index();
        let m = Arc::new(Match::new(master.to_string(), capacity, master_out, lease));
        matches.insert(master.to_string(), Arc::clone(&m));

        tracing::info!(master, capacity, slot, live = matches.len(), "match created");
        Ok(m)
    }

    pub async fn lookup(&self, master: &str) -> Option<Arc<Match>> {
        self.matches.lock().await.get(master).cloned()
    }

    pub async fn remove(&self, master: &str) -> Option<Arc<Match>> {
        let removed = self.matches.lock().await.remove(master);
        if removed.is_some() {
            tracing::debug!(master, "match removed from registry");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.matches.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.matches.lock().await.is_empty()
    }

    /// Summaries of every registered match, ordered by master identity.
    pub async fn snapshot(&self) -> Vec<MatchSummary> {
        let live: Vec<Arc<Match>> = self.matches.lock().await.values().cloned().collect();
        let mut out = Vec::with_capacity(live.len());
        for m in live {
            out.push(m.summary().await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::{ConnId, GuesserHandle};
    use hangman_core::config::default_channels;
    use tokio::sync::mpsc;

    fn registry(max: usize) -> MatchRegistry {
        MatchRegistry::new(max, ChannelAllocator::from_config(&default_channels(max)))
    }

    fn outbox() -> Outbox {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn create_and_lookup() {
        let reg = registry(2);
        let m = reg.create("bob", 3, outbox()).await.unwrap();
        assert_eq!(m.capacity(), 3);
        assert!(Arc::ptr_eq(&reg.lookup("bob").await.unwrap(), &m));
        assert!(reg.lookup("alice").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_master_is_rejected() {
        let reg = registry(2);
        reg.create("bob", 1, outbox()).await.unwrap();
        assert_eq!(
            reg.create("bob", 1, outbox()).await.unwrap_err(),
            RegistryError::AlreadyHosting("bob".into())
        );
        assert_eq!(reg.allocator().in_use(), 1);
    }

    #[tokio::test]
    async fn full_registry_rejects_until_a_match_finishes() {
        let reg = registry(2);
        reg.create("a", 1, outbox()).await.unwrap();
        let b = reg.create("b", 1, outbox()).await.unwrap();
        assert_eq!(
            reg.create("c", 1, outbox()).await.unwrap_err(),
            RegistryError::PoolFull(2)
        );

        b.finish().await;
        reg.remove("b").await;

        reg.create("c", 1, outbox()).await.unwrap();
        assert_eq!(
            reg.create("d", 1, outbox()).await.unwrap_err(),
            RegistryError::PoolFull(2)
        );
    }

    #[tokio::test]
    async fn removed_but_leased_channel_blocks_creation() {
        let reg = registry(1);
        reg.create("a", 1, outbox()).await.unwrap();
        let held = reg.remove("a").await.unwrap();

        assert!(matches!(
            reg.create("b", 1, outbox()).await,
            Err(RegistryError::Alloc(AllocError::Exhausted(1)))
        ));
        assert!(reg.is_empty().await);

        held.finish().await;
        reg.create("b", 1, outbox()).await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_is_ordered_by_master() {
        let reg = registry(3);
        reg.create("zed", 2, outbox()).await.unwrap();
        let amy = reg.create("amy", 2, outbox()).await.unwrap();
        reg.create("kim", 4, outbox()).await.unwrap();

        let (tx, _rx) = mpsc::channel(1);
        amy.join(GuesserHandle {
            conn: ConnId(7),
            identity: "g".into(),
            outbox: tx,
        })
        .await
        .unwrap();

        let snap = reg.snapshot().await;
        let masters: Vec<_> = snap.iter().map(|s| s.master.as_str()).collect();
        assert_eq!(masters, ["amy", "kim", "zed"]);
        assert_eq!(snap[0].joined, 1);
        assert_eq!(snap[1].capacity, 4);
    }

    #[tokio::test]
    async fn concurrent_creates_respect_the_cap() {
        let reg = Arc::new(registry(4));
        let mut tasks = Vec::new();
        for i in 0..16 {
            let reg = Arc::clone(&reg);
            tasks.push(tokio::spawn(async move {
                reg.create(&format!("m{i}"), 1, outbox()).await.is_ok()
            }));
        }
        let mut created = 0;
        for t in tasks {
            if t.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 4);
        assert_eq!(reg.len().await, 4);
        assert_eq!(reg.allocator().in_use(), 4);
    }
}
