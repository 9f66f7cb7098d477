//! Gameplay channel allocator.
//!
//! A fixed pool of (multicast address, port, key) triples, one per possible
//! concurrent match. A single cursor scans the occupancy array round-robin,
//! starting just after the last index it touched, so a freshly released
//! channel is the last candidate for reuse rather than the first.
//!
//! The occupancy lock is a plain std mutex: it is never held across an
//! await, and [`ChannelLease`] releases from `Drop`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hangman_core::config::ChannelConfig;
use hangman_core::wire::ChannelInfo;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("all {0} gameplay channels are in use")]
    Exhausted(usize),
}

pub(crate) struct SlotState {
    busy: Vec<bool>,
    /// Last index claimed or released. The next scan starts after it.
    cursor: Option<usize>,
    in_use: usize,
}

pub struct ChannelAllocator {
    pool: Vec<ChannelInfo>,
    state: Mutex<SlotState>,
}

impl ChannelAllocator {
    pub fn new(pool: Vec<ChannelInfo>) -> Arc<Self> {
        let busy = vec![false; pool.len()];
        Arc::new(Self {
            pool,
            state: Mutex::new(SlotState {
                busy,
                cursor: None,
                in_use: 0,
            }),
        })
    }

    pub fn from_config(channels: &[ChannelConfig]) -> Arc<Self> {
        Self::new(channels.iter().map(ChannelInfo::from).collect())
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the next free channel. The returned lease releases it on drop.
    pub fn acquire(self: &Arc<Self>) -> Result<ChannelLease, AllocError> {
        let len = self.pool.len();
        let mut state = self.state();
        let start = state.cursor.map_or(0, |c| (c + 1) % len.max(1));

        for step in 0..len {
            let index = (start + step) % len;
            if !state.busy[index] {
                state.busy[index] = true;
                state.cursor = Some(index);
                state.in_use += 1;
                tracing::debug!(index, in_use = state.in_use, "channel acquired");
                return Ok(ChannelLease {
                    allocator: Arc::clone(self),
                    index,
                    channel: self.pool[index].clone(),
                });
            }
        }

        Err(AllocError::Exhausted(len))
    }

    /// Return a channel to the pool. Releasing a free slot is a no-op.
    pub fn release(&self, index: usize) {
        let mut state = self.state();
        match state.busy.get_mut(index) {
            Some(busy) if *busy => {
                *busy = false;
                state.in_use -= 1;
                state.cursor = Some(index);
                tracing::debug!(index, in_use = state.in_use, "channel released");
            }
            Some(_) => tracing::warn!(index, "release of a free channel ignored"),
            None => tracing::warn!(index, "release of an unknown channel ignored"),
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    pub fn in_use(&self) -> usize {
        self.state().in_use
    }

    pub fn is_busy(&self, index: usize) -> bool {
        self.state().busy.get(index).copied().unwrap_or(false)
    }
}

/// Exclusive ownership of one pool slot.
pub struct ChannelLease {
    allocator: Arc<ChannelAllocator>,
    index: usize,
    channel: ChannelInfo,
}

impl ChannelLease {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.allocator.release(self.index);
    }
}

impl std::fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLease")
            .field("index", &self.index)
            .field("address", &self.channel.address)
            .field("port", &self.channel.port)
            .finish()
    }
}
