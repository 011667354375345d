use std::fmt;

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use super::StoreError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Encrypted payload plus the parameters needed to open it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Passphrase-based ChaCha20-Poly1305 sealing for the session file.
///
/// A fresh salt and nonce are drawn for every `seal`, so the key is derived
/// again (Argon2id) on each save and load.
#[derive(Clone)]
pub struct SessionCipher {
    passphrase: String,
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl SessionCipher {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_LEN], StoreError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StoreError::Crypto(format!("key derivation failed: {}", e)))?;
        Ok(key)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed, StoreError> {
        let mut rng = rand::thread_rng();
        let mut salt = vec![0u8; SALT_LEN];
        let mut nonce = vec![0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = self.derive_key(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| StoreError::Crypto("encryption failed".to_string()))?;

        Ok(Sealed {
            salt,
            nonce,
            ciphertext,
        })
    }

    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>, StoreError> {
        if sealed.nonce.len() != NONCE_LEN {
            return Err(StoreError::Crypto(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                sealed.nonce.len()
            )));
        }
        let key = self.derive_key(&sealed.salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| StoreError::Crypto("wrong passphrase or tampered session file".to_string()))
    }
}
