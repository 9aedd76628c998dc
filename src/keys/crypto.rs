//! Secret encryption at rest.
//!
//! Secrets are sealed with AES-256-GCM under a key derived from the
//! process-wide passphrase via PBKDF2-HMAC-SHA256. Every seal uses a fresh
//! random salt and a fresh random 96-bit nonce, so two encryptions of the
//! same secret never produce the same output. Nonce reuse would be
//! catastrophic for GCM security.
//!
//! Stored form: base64(salt[16] || nonce[12] || ciphertext+tag).

use std::num::NonZeroU32;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const DEFAULT_ITERATIONS: u32 = 600_000;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("System CSPRNG unavailable")]
    Rng,
    #[error("AES-256-GCM sealing failed")]
    Seal,
    #[error("Decryption failed: wrong passphrase or corrupted data")]
    Open,
    #[error("Stored secret is malformed: {0}")]
    Malformed(String),
}

/// Seals and opens provider secrets with a passphrase-derived key
pub struct SecretCipher {
    passphrase: Vec<u8>,
    iterations: NonZeroU32,
}

impl SecretCipher {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: passphrase.as_bytes().to_vec(),
            iterations: NonZeroU32::new(DEFAULT_ITERATIONS).unwrap_or(NonZeroU32::MIN),
        }
    }

    /// Custom KDF cost. Lowered counts are for test setups where derivation
    /// speed matters; production callers should stay at the default.
    pub fn with_iterations(passphrase: &str, iterations: u32) -> Self {
        Self {
            passphrase: passphrase.as_bytes().to_vec(),
            iterations: NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt,
            &self.passphrase,
            &mut key,
        );
        key
    }

    /// Encrypt a plaintext secret into its stored base64 form
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let rng = SystemRandom::new();

        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt).map_err(|_| CryptoError::Rng)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes).map_err(|_| CryptoError::Rng)?;

        let key = self.derive_key(&salt);
        let unbound = UnboundKey::new(&AES_256_GCM, &key).map_err(|_| CryptoError::Seal)?;
        let sealing = LessSafeKey::new(unbound);

        let mut in_out = plaintext.as_bytes().to_vec();
        sealing
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Seal)?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + in_out.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);

        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored base64 secret back to plaintext
    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let blob = BASE64
            .decode(sealed)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;

        if blob.len() < SALT_LEN + NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CryptoError::Malformed("blob too short".to_string()));
        }

        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let key = self.derive_key(salt);
        let unbound = UnboundKey::new(&AES_256_GCM, &key).map_err(|_| CryptoError::Open)?;
        let opening = LessSafeKey::new(unbound);

        let mut in_out = ciphertext.to_vec();
        let plaintext = opening
            .open_in_place(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Open)?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(passphrase: &str) -> SecretCipher {
        // Low iteration count keeps tests fast
        SecretCipher::with_iterations(passphrase, 10)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = cipher("correct horse battery staple");
        let sealed = cipher.seal("sk-test-abc123").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), "sk-test-abc123");
    }

    #[test]
    fn test_same_plaintext_seals_differently() {
        let cipher = cipher("passphrase");
        let a = cipher.seal("same secret").unwrap();
        let b = cipher.seal("same secret").unwrap();
        // Random salt and nonce per seal
        assert_ne!(a, b);
        assert_eq!(cipher.open(&a).unwrap(), cipher.open(&b).unwrap());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = cipher("right").seal("secret").unwrap();
        assert!(matches!(cipher("wrong").open(&sealed), Err(CryptoError::Open)));
    }

    #[test]
    fn test_malformed_input_rejected() {
        let cipher = cipher("p");
        assert!(matches!(
            cipher.open("not base64 !!!"),
            Err(CryptoError::Malformed(_))
        ));
        assert!(matches!(
            cipher.open("c2hvcnQ="),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = cipher("p");
        let sealed = cipher.seal("secret").unwrap();
        let mut blob = BASE64.decode(&sealed).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(cipher.open(&BASE64.encode(blob)).is_err());
    }
}
