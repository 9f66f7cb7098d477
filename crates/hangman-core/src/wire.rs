//! Handshake channel wire format.
//!
//! These types ARE the handshake protocol. One message per line.
//!
//! Client → server: a single-letter type tag followed by a tag-specific
//! payload, e.g. `Ealice` (HELLO), `B3` (MASTER with capacity 3).
//!
//! Server → client: one JSON object per line with a one-character `type`
//! field. Start notices also carry the gameplay channel triple.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Tags ──────────────────────────────────────────────────────────────────────

pub const MASTER: char = 'B';
pub const GUESSER: char = 'C';
pub const EXIT: char = 'D';
pub const HELLO: char = 'E';
pub const START_MATCH: char = 'F';
pub const NO_MORE_MATCH: char = 'G';
pub const MATCH_CREATED: char = 'H';
pub const MATCH_FULL: char = 'I';
pub const ADDED_TO_MATCH: char = 'J';
pub const MATCH_ALREADY_CLOSED: char = 'K';
pub const MASTER_DOESNT_EXIST: char = 'L';
pub const MATCH_CLOSED: char = 'N';
pub const MATCH_LIST: char = 'V';

// ── Client frames ─────────────────────────────────────────────────────────────

/// A request sent by a player over the handshake connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Hello { identity: String },
    Master { capacity: usize },
    Guesser { master: String },
    StartMatch,
    Exit,
}

impl ClientFrame {
    /// Parse one line. Trailing whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self, WireError> {
        let line = line.trim_end();
        let mut chars = line.chars();
        let tag = chars.next().ok_or(WireError::Empty)?;
        let payload = chars.as_str().trim();

        match tag {
            HELLO => {
                if payload.is_empty() {
                    return Err(WireError::MissingPayload(tag));
                }
                Ok(Self::Hello {
                    identity: payload.to_string(),
                })
            }
            MASTER => {
                let capacity: usize = payload
                    .parse()
                    .map_err(|_| WireError::BadPayload(tag, payload.to_string()))?;
                if capacity == 0 {
                    return Err(WireError::BadPayload(tag, payload.to_string()));
                }
                Ok(Self::Master { capacity })
            }
            GUESSER => {
                if payload.is_empty() {
                    return Err(WireError::MissingPayload(tag));
                }
                Ok(Self::Guesser {
                    master: payload.to_string(),
                })
            }
            START_MATCH => Ok(Self::StartMatch),
            EXIT => Ok(Self::Exit),
            other => Err(WireError::UnknownTag(other)),
        }
    }

    /// Encode as a single line, without the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Self::Hello { identity } => format!("{HELLO}{identity}"),
            Self::Master { capacity } => format!("{MASTER}{capacity}"),
            Self::Guesser { master } => format!("{GUESSER}{master}"),
            Self::StartMatch => START_MATCH.to_string(),
            Self::Exit => EXIT.to_string(),
        }
    }
}

// ── Server frames ─────────────────────────────────────────────────────────────

/// The gameplay channel a match is bound to: multicast group, port and the
/// passphrase the match key is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub address: String,
    pub port: u16,
    pub key: String,
}

/// One open match as shown in the lobby listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub master: String,
    pub joined: usize,
    pub capacity: usize,
}

impl std::fmt::Display for MatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}, master: {}", self.joined, self.capacity, self.master)
    }
}

/// A reply or notice sent by the coordinator over the handshake connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "G")]
    NoMoreMatch,
    #[serde(rename = "H")]
    MatchCreated(ChannelInfo),
    #[serde(rename = "I")]
    MatchFull,
    #[serde(rename = "J")]
    AddedToMatch,
    #[serde(rename = "K")]
    MatchAlreadyClosed,
    #[serde(rename = "L")]
    MasterDoesntExist,
    #[serde(rename = "N")]
    MatchClosed,
    /// Sent to the master when capacity is reached, and to every guesser
    /// when the master starts the match.
    #[serde(rename = "F")]
    StartMatch(ChannelInfo),
    #[serde(rename = "V")]
    MatchList { matches: Vec<MatchSummary> },
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Json)
    }

    pub fn decode(line: &str) -> Result<Self, WireError> {
        serde_json::from_str(line.trim_end()).map_err(WireError::Json)
    }

    /// The one-character type tag on the wire.
    pub fn tag(&self) -> char {
        match self {
            Self::NoMoreMatch => NO_MORE_MATCH,
            Self::MatchCreated(_) => MATCH_CREATED,
            Self::MatchFull => MATCH_FULL,
            Self::AddedToMatch => ADDED_TO_MATCH,
            Self::MatchAlreadyClosed => MATCH_ALREADY_CLOSED,
            Self::MasterDoesntExist => MASTER_DOESNT_EXIST,
            Self::MatchClosed => MATCH_CLOSED,
            Self::StartMatch(_) => START_MATCH,
            Self::MatchList { .. } => MATCH_LIST,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WireError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame tag {0:?}")]
    UnknownTag(char),
    #[error("frame {0:?} is missing its payload")]
    MissingPayload(char),
    #[error("frame {0:?} has invalid payload {1:?}")]
    BadPayload(char, String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
