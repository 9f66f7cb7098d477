//! hangman-core: shared types, wire formats, and cryptographic primitives.
//! All other hangman crates depend on this one.

pub mod config;
pub mod crypto;
pub mod message;
pub mod wire;
pub mod word;

pub use message::{GameMessage, MessageType};
pub use word::WordTracker;
