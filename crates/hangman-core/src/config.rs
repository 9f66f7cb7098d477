//! Configuration system for hangman.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HANGMAN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/hangman/config.toml
//!   3. ~/.config/hangman/config.toml

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::ChannelInfo;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HangmanConfig {
    pub server: ServerConfig,
    pub game: GameConfig,
    pub player: PlayerConfig,
    /// Gameplay channel pool. One entry per concurrent match.
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Handshake listen address.
    pub listen_addr: String,
    /// Maximum number of concurrent matches. Must equal the pool size.
    pub max_matches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Game timer: upper bound on gameplay, in seconds.
    pub match_secs: u64,
    /// How long a player waits in the handshake phase for the match to form.
    pub formation_secs: u64,
    /// Guesser acknowledgement timeout, in milliseconds.
    pub ack_millis: u64,
    /// Misses allowed before the master wins.
    pub max_trials: u32,
    /// Stale retransmissions tolerated before the master unicasts GO_ON.
    pub stale_threshold: u32,
    /// Extra time the coordinator holds a channel after the game timer bound.
    pub release_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Coordinator handshake address.
    pub server_addr: String,
    /// Local IPv4 interface used for multicast. 0.0.0.0 = OS default.
    pub interface: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub address: Ipv4Addr,
    pub port: u16,
    pub key: String,
}

impl From<&ChannelConfig> for ChannelInfo {
    fn from(c: &ChannelConfig) -> Self {
        ChannelInfo {
            address: c.address.to_string(),
            port: c.port,
            key: c.key.clone(),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HangmanConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        let channels = default_channels(server.max_matches);
        Self {
            server,
            game: GameConfig::default(),
            player: PlayerConfig::default(),
            channels,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7060".to_string(),
            max_matches: 4,
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            match_secs: 300,
            formation_secs: 300,
            ack_millis: 200,
            max_trials: 10,
            stale_threshold: 3,
            release_grace_secs: 5,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7060".to_string(),
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// `count` channels on 239.255.42.x (administratively scoped), ports from 4001.
pub fn default_channels(count: usize) -> Vec<ChannelConfig> {
    (0..count)
        .map(|i| ChannelConfig {
            address: Ipv4Addr::new(239, 255, 42, (i % 254) as u8 + 1),
            port: 4001 + i as u16,
            key: format!("hangman-channel-{}", i + 1),
        })
        .collect()
}

impl GameConfig {
    pub fn match_duration(&self) -> Duration {
        Duration::from_secs(self.match_secs)
    }

    pub fn formation_duration(&self) -> Duration {
        Duration::from_secs(self.formation_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_millis)
    }

    /// How long the coordinator keeps a started match's channel leased.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.match_secs + self.release_grace_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("hangman")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("max_matches must be at least 1")]
    NoMatches,
    #[error("channel pool has {pool} entries but max_matches is {max}")]
    PoolMismatch { pool: usize, max: usize },
    #[error("channel address {0} is not an IPv4 multicast address")]
    NotMulticast(Ipv4Addr),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HangmanConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            HangmanConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HANGMAN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&HangmanConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Check the pool against the match cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_matches == 0 {
            return Err(ConfigError::NoMatches);
        }
        if self.channels.len() != self.server.max_matches {
            return Err(ConfigError::PoolMismatch {
                pool: self.channels.len(),
                max: self.server.max_matches,
            });
        }
        if let Some(bad) = self.channels.iter().find(|c| !c.address.is_multicast()) {
            return Err(ConfigError::NotMulticast(bad.address));
        }
        Ok(())
    }

    /// Apply HANGMAN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HANGMAN_SERVER__LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Ok(v) = std::env::var("HANGMAN_SERVER__MAX_MATCHES") {
            if let Ok(n) = v.parse() {
                self.server.max_matches = n;
            }
        }
        if let Ok(v) = std::env::var("HANGMAN_GAME__MATCH_SECS") {
            if let Ok(n) = v.parse() {
                self.game.match_secs = n;
            }
        }
        if let Ok(v) = std::env::var("HANGMAN_GAME__ACK_MILLIS") {
            if let Ok(n) = v.parse() {
                self.game.ack_millis = n;
            }
        }
        if let Ok(v) = std::env::var("HANGMAN_PLAYER__SERVER_ADDR") {
            self.player.server_addr = v;
        }
    }
}
