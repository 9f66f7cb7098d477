//! Cryptographic primitives for hangman gameplay channels.
//!
//! Every field of a gameplay datagram is sealed on its own with
//! ChaCha20-Poly1305, keyed by the per-match secret handed out at handoff.
//! The cipher comes from snow's default crypto resolver, the same AEAD the
//! Noise transports use.
//!
//! Sealed field format (hex encoded on the wire):
//!   [u64 nonce LE (8 bytes)] [ciphertext] [16-byte Poly1305 MAC]
//!
//! Key material is wrapped in Zeroizing and wiped on drop.
//! There is no unsafe code in this module.

use snow::params::CipherChoice;
use snow::resolvers::{CryptoResolver, DefaultResolver};
use snow::types::Cipher;
use thiserror::Error;
use zeroize::Zeroizing;

/// Domain separation for match key derivation. Never change this after
/// release: both sides of a match must derive the same key.
const KEY_CONTEXT: &str = "hangman 2024-06 gameplay field key v1";

const NONCE_LEN: usize = 8;
const MAC_LEN: usize = 16;

/// Derive the 32-byte match key from the channel passphrase.
pub fn derive_match_key(secret: &str) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(blake3::derive_key(KEY_CONTEXT, secret.as_bytes()))
}

/// Seals and opens individual gameplay fields under one match key.
pub struct FieldCipher {
    cipher: Box<dyn Cipher>,
}

impl FieldCipher {
    /// Build a cipher from the channel passphrase issued at handoff.
    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        let key = derive_match_key(secret);
        Self::from_key(&key)
    }

    pub fn from_key(key: &[u8; 32]) -> Result<Self, CryptoError> {
        let mut cipher = DefaultResolver
            .resolve_cipher(&CipherChoice::ChaChaPoly)
            .ok_or(CryptoError::Unavailable)?;
        cipher.set(key);
        Ok(Self { cipher })
    }

    /// Seal one field value. Each call draws a fresh random nonce, so the
    /// same plaintext never produces the same output twice.
    pub fn seal(&self, plaintext: &str) -> String {
        let nonce: u64 = rand::random();
        let plaintext = plaintext.as_bytes();

        let mut out = vec![0u8; NONCE_LEN + plaintext.len() + MAC_LEN];
        out[..NONCE_LEN].copy_from_slice(&nonce.to_le_bytes());
        let written = self
            .cipher
            .encrypt(nonce, &[], plaintext, &mut out[NONCE_LEN..]);
        out.truncate(NONCE_LEN + written);
        hex::encode(out)
    }

    /// Open one sealed field. Fails on malformed input or when the value was
    /// sealed under another match key.
    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let bytes = hex::decode(sealed).map_err(|_| CryptoError::Encoding)?;
        if bytes.len() < NONCE_LEN + MAC_LEN {
            return Err(CryptoError::TooShort);
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        let nonce = u64::from_le_bytes(nonce);

        let mut out = vec![0u8; bytes.len() - NONCE_LEN];
        let written = self
            .cipher
            .decrypt(nonce, &[], &bytes[NONCE_LEN..], &mut out)
            .map_err(|_| CryptoError::Open)?;
        out.truncate(written);

        String::from_utf8(out).map_err(|_| CryptoError::Encoding)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ChaChaPoly cipher not available from the crypto resolver")]
    Unavailable,

    #[error("sealed field is not valid hex or not valid UTF-8")]
    Encoding,

    #[error("sealed field too short (need at least 24 bytes: 8 nonce + 16 MAC)")]
    TooShort,

    #[error("authentication failed, wrong match key or tampered field")]
    Open,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
