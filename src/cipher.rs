//! Symmetric field-level encryption ("PBE-style", keyed by a user secret).
//!
//! Uses AES-256-SIV (nonce-misuse-resistant AEAD): even if the same secret
//! value were ever encrypted twice with an identical nonce, SIV mode still
//! only leaks whether the two plaintexts were equal, never the plaintext
//! itself. A fresh random nonce is still drawn per call so that repeated
//! encryption of the same plaintext produces different ciphertexts (P3).

use aes_siv::aead::{generic_array::GenericArray, Aead};
use aes_siv::{Aes256SivAead, KeyInit};
use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::error::Result;
use crate::Error;

const NONCE_LEN: usize = 16;

/// A process-wide symmetric key, derived once from a user-supplied secret
/// and immutable thereafter.
pub struct Cipher {
    aead: Aes256SivAead,
}

impl Cipher {
    /// Derive a cipher from a user secret. The secret itself is never
    /// stored; only the derived 64-byte AES-SIV key material lives in
    /// memory, and that is zeroized on drop.
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(secret.as_bytes());
        let key_bytes: Zeroizing<[u8; 64]> = Zeroizing::new(hasher.finalize().into());
        let key = GenericArray::from_slice(key_bytes.as_slice());
        Self {
            aead: Aes256SivAead::new(key),
        }
    }

    /// Encrypt a single field value. Returns a self-contained base64
    /// payload carrying the random nonce ahead of the ciphertext.
    pub fn encrypt_field(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = self
            .aead
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::CipherError("field encryption failed".into()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(base64::encode(payload))
    }

    /// Decrypt a payload produced by [`Cipher::encrypt_field`].
    pub fn decrypt_field(&self, payload_b64: &str) -> Result<String> {
        let payload = base64::decode(payload_b64)
            .map_err(|e| Error::CipherError(format!("malformed ciphertext: {e}")))?;
        if payload.len() < NONCE_LEN {
            return Err(Error::CipherError("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = GenericArray::from_slice(nonce_bytes);

        let plaintext = self
            .aead
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::CipherError("decryption failed: tamper or wrong key".into()))?;

        String::from_utf8(plaintext).map_err(|e| Error::CipherError(e.to_string()))
    }
}
