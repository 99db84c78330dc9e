// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated encryption for persisted event lists.
//!
//! Blobs are ChaCha20-Poly1305 sealed with a fresh random nonce and encoded as
//! `tw1:<base64(nonce || ciphertext)>`. The key is derived from the user's
//! identity; without an identity a fixed anonymous key is used so nothing is
//! ever persisted in plaintext.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;
const ENVELOPE_PREFIX: &str = "tw1:";
const USER_KEY_DOMAIN: &[u8] = b"tabwire/v1/user:";
const ANONYMOUS_KEY_DOMAIN: &[u8] = b"tabwire/v1/anonymous";

/// Symmetric cipher bound to one identity.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
    anonymous: bool,
}

impl Cipher {
    /// Cipher keyed by a user identity.
    pub fn for_user(user_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(USER_KEY_DOMAIN);
        hasher.update(user_id.as_bytes());
        Cipher { key: hasher.finalize().into(), anonymous: false }
    }

    /// Deterministic cipher used before an identity is known.
    pub fn anonymous() -> Self {
        let key: [u8; 32] = Sha256::digest(ANONYMOUS_KEY_DOMAIN).into();
        Cipher { key, anonymous: true }
    }

    /// Picks the user cipher when an identity is available.
    pub fn for_identity(user_id: Option<&str>) -> Self {
        match user_id {
            Some(id) if !id.is_empty() => Self::for_user(id),
            _ => Self::anonymous(),
        }
    }

    /// Encrypts `plaintext` into an envelope string.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new(&self.key.into());
        let mut nonce_bytes = [0u8; NONCE_LEN];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext =
            cipher.encrypt(nonce, plaintext.as_bytes()).map_err(|_| Error::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{ENVELOPE_PREFIX}{}", STANDARD.encode(&combined)))
    }

    /// Decrypts an envelope produced by [`Cipher::seal`].
    pub fn open(&self, envelope: &str) -> Result<String> {
        let encoded = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| Error::InvalidEnvelope("missing tw1: prefix".to_string()))?;
        let combined = STANDARD
            .decode(encoded)
            .map_err(|e| Error::InvalidEnvelope(format!("bad base64: {e}")))?;

        if combined.len() < NONCE_LEN {
            return Err(Error::InvalidEnvelope("truncated nonce".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(&self.key.into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| Error::DecryptionFailed)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").field("anonymous", &self.anonymous).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "crypto_tests.rs"]
mod tests;
