//! hangman-player: the player side of a hangman match.
//!
//! A [`peer::PeerSession`] runs the handshake with the coordinator. Once the
//! match starts it hands off to a [`peer::GameChannel`] over a
//! [`transport::GameTransport`], and the role engine takes over.

pub mod guesser;
pub mod master;
pub mod peer;
pub mod timer;
pub mod transport;

pub use guesser::{GuessRejected, GuesserEngine, GuesserEvent, GuesserInput, GuesserOutcome};
pub use master::{MasterCommand, MasterEngine, MasterEvent, MasterGame, MasterOutcome, Verdict};
pub use peer::{ActiveSession, GameChannel, HandshakeEvent, PeerSession, PeerState, Refusal, Role};
pub use timer::Deadline;
pub use transport::{GameTransport, LocalHub, LocalTransport, MulticastTransport};
