// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Encryption service: AES-256-GCM (ring) for everything the trust core
// keeps at rest.  Wire format: nonce (12 bytes) || ciphertext || tag (16).
// A fresh random nonce is drawn for every call.

use attesta_core::error::{AttestaError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

/// Required key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

fn crypto_err(context: &str) -> AttestaError {
    AttestaError::Crypto(context.to_owned())
}

/// Authenticated symmetric encryption with a fixed master key.
///
/// The key is provisioned by the caller; this type only refuses material
/// that is too short.  Safe to share across threads.
pub struct EncryptionService {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("algorithm", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}

impl EncryptionService {
    /// Build from raw key bytes.  The first [`KEY_LEN`] bytes are used;
    /// anything shorter is rejected.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() < KEY_LEN {
            return Err(AttestaError::Crypto(format!(
                "encryption key must be at least {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, &key[..KEY_LEN])
            .map_err(|_| crypto_err("invalid AES-256-GCM key"))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Build from a hex-encoded key (as read from the environment).
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(hex_key.trim()).map_err(|_| crypto_err("encryption key is not valid hex"))?,
        );
        Self::new(&bytes)
    }

    /// Draw a fresh random key from the OS CSPRNG.
    pub fn generate_key() -> Result<Zeroizing<Vec<u8>>> {
        let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| crypto_err("key generation failed"))?;
        Ok(key)
    }

    /// Encrypt `plaintext`; output is `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal(plaintext, &[])
    }

    /// Decrypt the output of [`encrypt`](Self::encrypt).  Truncated input and
    /// authentication failures both return `Crypto`; no partial plaintext is
    /// ever produced.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.open(ciphertext, &[])
    }

    /// Encrypt and bind the ciphertext to `context` (authenticated, not
    /// encrypted).  Opening with a different context fails.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn seal(&self, plaintext: &[u8], context: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| crypto_err("nonce generation failed"))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(context),
                &mut in_out,
            )
            .map_err(|_| crypto_err("AES-GCM encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);

        debug!(ciphertext_len = out.len(), "encryption complete");
        Ok(out)
    }

    /// Counterpart of [`seal`](Self::seal).
    #[instrument(skip_all, fields(ciphertext_len = ciphertext.len()))]
    pub fn open(&self, ciphertext: &[u8], context: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(crypto_err("ciphertext too short"));
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| crypto_err("malformed nonce"))?;

        let mut in_out = Zeroizing::new(sealed.to_vec());
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(context), &mut in_out)
            .map_err(|_| crypto_err("authentication failed"))?;

        debug!(plaintext_len = plaintext.len(), "decryption complete");
        Ok(plaintext.to_vec())
    }

    /// Text variant: UTF-8 in, base64 ciphertext out.
    pub fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    /// Text variant of [`decrypt`](Self::decrypt).
    pub fn decrypt_string(&self, encoded: &str) -> Result<String> {
        let ciphertext = STANDARD
            .decode(encoded.trim())
            .map_err(|_| crypto_err("ciphertext is not valid base64"))?;
        let plaintext = self.decrypt(&ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| crypto_err("plaintext is not valid UTF-8"))
    }
}
