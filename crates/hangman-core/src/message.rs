//! Gameplay channel messages.
//!
//! On the wire a datagram is a JSON object whose field values are each
//! sealed with the match key (see [`crate::crypto`]). The type tag is sealed
//! too, so a receiver has to open `type` before it can dispatch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{CryptoError, FieldCipher};

/// Largest datagram either role will ever send or accept.
pub const MAX_DATAGRAM: usize = 65_536;

/// Gameplay message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    NewLetter,
    PartialResult,
    Timeout,
    EndOfTrials,
    GuesserWin,
    GoOn,
    EndGame,
}

impl MessageType {
    pub fn tag(self) -> char {
        match self {
            Self::NewLetter => 'O',
            Self::PartialResult => 'P',
            Self::Timeout => 'Q',
            Self::EndOfTrials => 'R',
            Self::GuesserWin => 'S',
            Self::GoOn => 'T',
            Self::EndGame => 'U',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'O' => Some(Self::NewLetter),
            'P' => Some(Self::PartialResult),
            'Q' => Some(Self::Timeout),
            'R' => Some(Self::EndOfTrials),
            'S' => Some(Self::GuesserWin),
            'T' => Some(Self::GoOn),
            'U' => Some(Self::EndGame),
            _ => None,
        }
    }
}

/// A decoded gameplay message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameMessage {
    /// Guesser → channel: a letter attempt.
    NewLetter {
        letter: char,
        guesser: String,
        pkt_number: u64,
    },
    /// Master → channel: result of an accepted attempt. Doubles as the
    /// acknowledgement for `guesser`'s attempt `pkt_number`.
    PartialResult {
        letter: char,
        guesser: String,
        word: String,
        pkt_number: u64,
    },
    Timeout,
    EndOfTrials,
    GuesserWin {
        guesser: String,
        word: String,
    },
    /// Master → one guesser, unicast: stop retransmitting `pkt_number`.
    GoOn {
        guesser: String,
        pkt_number: u64,
    },
    EndGame,
}

/// The sealed on-wire form. Absent fields are omitted.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SealedDatagram {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    letter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    guesser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    word: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pkt_number: Option<String>,
}

impl GameMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::NewLetter { .. } => MessageType::NewLetter,
            Self::PartialResult { .. } => MessageType::PartialResult,
            Self::Timeout => MessageType::Timeout,
            Self::EndOfTrials => MessageType::EndOfTrials,
            Self::GuesserWin { .. } => MessageType::GuesserWin,
            Self::GoOn { .. } => MessageType::GoOn,
            Self::EndGame => MessageType::EndGame,
        }
    }

    /// True for the messages that end a game.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::EndOfTrials | Self::GuesserWin { .. } | Self::EndGame
        )
    }

    /// Seal every field and serialize to datagram bytes.
    pub fn seal(&self, cipher: &FieldCipher) -> Result<Vec<u8>, MessageError> {
        let seal = |s: &str| Some(cipher.seal(s));
        let mut d = SealedDatagram {
            kind: cipher.seal(&self.message_type().tag().to_string()),
            ..Default::default()
        };

        match self {
            Self::NewLetter {
                letter,
                guesser,
                pkt_number,
            } => {
                d.letter = seal(&letter.to_string());
                d.guesser = seal(guesser);
                d.pkt_number = seal(&pkt_number.to_string());
            }
            Self::PartialResult {
                letter,
                guesser,
                word,
                pkt_number,
            } => {
                d.letter = seal(&letter.to_string());
                d.guesser = seal(guesser);
                d.word = seal(word);
                d.pkt_number = seal(&pkt_number.to_string());
            }
            Self::GuesserWin { guesser, word } => {
                d.guesser = seal(guesser);
                d.word = seal(word);
            }
            Self::GoOn {
                guesser,
                pkt_number,
            } => {
                d.guesser = seal(guesser);
                d.pkt_number = seal(&pkt_number.to_string());
            }
            Self::Timeout | Self::EndOfTrials | Self::EndGame => {}
        }

        serde_json::to_vec(&d).map_err(MessageError::Json)
    }

    /// Parse datagram bytes and open every field.
    ///
    /// A datagram sealed under another match key fails on the `type` field
    /// with [`MessageError::Crypto`].
    pub fn open(bytes: &[u8], cipher: &FieldCipher) -> Result<Self, MessageError> {
        let d: SealedDatagram = serde_json::from_slice(bytes).map_err(MessageError::Json)?;

        let tag = single_char(&cipher.open(&d.kind)?, "type")?;
        let kind = MessageType::from_tag(tag).ok_or(MessageError::UnknownType(tag))?;

        let field = |value: &Option<String>, name: &'static str| -> Result<String, MessageError> {
            let sealed = value.as_ref().ok_or(MessageError::MissingField(name))?;
            Ok(cipher.open(sealed)?)
        };
        let number = |value: &Option<String>, name: &'static str| -> Result<u64, MessageError> {
            field(value, name)?
                .parse()
                .map_err(|_| MessageError::BadField(name))
        };

        let msg = match kind {
            MessageType::NewLetter => Self::NewLetter {
                letter: single_char(&field(&d.letter, "letter")?, "letter")?,
                guesser: field(&d.guesser, "guesser")?,
                pkt_number: number(&d.pkt_number, "pkt_number")?,
            },
            MessageType::PartialResult => Self::PartialResult {
                letter: single_char(&field(&d.letter, "letter")?, "letter")?,
                guesser: field(&d.guesser, "guesser")?,
                word: field(&d.word, "word")?,
                pkt_number: number(&d.pkt_number, "pkt_number")?,
            },
            MessageType::GuesserWin => Self::GuesserWin {
                guesser: field(&d.guesser, "guesser")?,
                word: field(&d.word, "word")?,
            },
            MessageType::GoOn => Self::GoOn {
                guesser: field(&d.guesser, "guesser")?,
                pkt_number: number(&d.pkt_number, "pkt_number")?,
            },
            MessageType::Timeout => Self::Timeout,
            MessageType::EndOfTrials => Self::EndOfTrials,
            MessageType::EndGame => Self::EndGame,
        };
        Ok(msg)
    }
}

fn single_char(value: &str, name: &'static str) -> Result<char, MessageError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(MessageError::BadField(name)),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("json: {0}")]
    Json(serde_json::Error),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("unknown message type {0:?}")]
    UnknownType(char),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid field {0}")]
    BadField(&'static str),
}
