//! hangman-services: coordinator-side shared state.
//!
//! Every structure here is explicit owned state behind its own lock and is
//! handed to the components that need it. There are no process-wide
//! singletons, so tests build isolated instances per case.

pub mod channel;
pub mod directory;
pub mod matches;
pub mod registry;

pub use channel::{AllocError, ChannelAllocator, ChannelLease};
pub use directory::{Directory, IdentityStatus, PushError, PushSink};
pub use matches::{ConnId, GuesserHandle, JoinError, Match, MatchState, Outbox};
pub use registry::{MatchRegistry, RegistryError};
