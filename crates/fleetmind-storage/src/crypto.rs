//! AEAD encryption for stored credentials.
//!
//! Values are encrypted with AES-256-GCM. The key is derived from the
//! application identity with PBKDF2-HMAC-SHA256 (100k iterations, fixed
//! salt), so a store can be reopened by the same installation without a
//! user-supplied passphrase.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use sha2::Sha256;

use fleetmind_core::CoreError;

const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_SALT: &[u8] = b"FleetMind-Credential-Salt-2024";
const NONCE_LEN: usize = 12;

/// Cipher for credential values.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Derive a cipher from the application identity.
    pub fn from_identity(identity: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(identity.as_bytes(), KEY_SALT, PBKDF2_ITERATIONS, &mut key);
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Encrypt a value. Returns base64 of `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::internal("credential encryption failed"))?;

        let mut combined = nonce.to_vec();
        combined.extend(ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<String, CoreError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CoreError::internal("credential value is not valid base64"))?;
        if combined.len() <= NONCE_LEN {
            return Err(CoreError::internal("credential value too short"));
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::internal("credential decryption failed"))?;

        String::from_utf8(plaintext)
            .map_err(|_| CoreError::internal("credential value is not valid UTF-8"))
    }
}
