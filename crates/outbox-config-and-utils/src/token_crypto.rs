//! Sealing secrets at rest.
//!
//! Client auth tokens and file key headers are stored sealed with
//! ChaCha20-Poly1305. A sealed blob is `nonce (12 bytes) || ciphertext`.

use crate::{CoreError, CoreResult};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

/// Key size for ChaCha20-Poly1305 (256 bits).
pub const SEALING_KEY_SIZE: usize = 32;
/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const SEALING_NONCE_SIZE: usize = 12;

/// A 256-bit sealing key, wiped on drop.
#[derive(Clone)]
pub struct SealingKey(Zeroizing<[u8; SEALING_KEY_SIZE]>);

impl SealingKey {
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; SEALING_KEY_SIZE]);
        rand::thread_rng().fill_bytes(key.as_mut_slice());
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != SEALING_KEY_SIZE {
            return Err(CoreError::Crypto(format!(
                "invalid key length: expected {}, got {}",
                SEALING_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; SEALING_KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Read the key at `path`, creating it (mode 0600 on unix) if missing.
    pub fn load_or_create(path: &Path) -> CoreResult<Self> {
        if path.exists() {
            let bytes = Zeroizing::new(std::fs::read(path)?);
            return Self::from_bytes(&bytes);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let key = Self::generate();
        std::fs::write(path, key.0.as_slice())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        tracing::info!(path = %path.display(), "Created sealing key");
        Ok(key)
    }

    pub fn seal(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce = [0u8; SEALING_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CoreError::Crypto(format!("encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(SEALING_NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> CoreResult<Zeroizing<Vec<u8>>> {
        if sealed.len() < SEALING_NONCE_SIZE {
            return Err(CoreError::Crypto("sealed blob is too short".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(SEALING_NONCE_SIZE);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::Crypto("decryption failed".to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.0.as_slice()))
    }
}

impl fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealingKey(<redacted>)")
    }
}
