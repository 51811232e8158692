//! Connections and key material kept in a tenant directory.
//!
//! `connections.json` maps each recipient to its standing and the secrets
//! of the connection:
//!
//! ```json
//! {
//!   "frodo.example": {
//!     "connected": true,
//!     "circles": [],
//!     "sharedSecret": "<base64, 32 bytes>",
//!     "clientAuthToken": "<base64>"
//!   }
//! }
//! ```
//!
//! The file is re-read on every lookup so a revoked connection takes effect
//! on the next delivery attempt.

use async_trait::async_trait;
use base64::Engine;
use outbox_config_and_utils::token_crypto::SEALING_NONCE_SIZE;
use outbox_config_and_utils::SealingKey;
use peer_outbox::{EncryptedClientAuthToken, EncryptedKeyHeader, Recipient};
use peer_transfer::{
    ClientAuthToken, ConnectionDirectory, CryptoError, RecipientStanding, ServerFileHeader, StorageError,
    TransferCrypto,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use uuid::Uuid;
use zeroize::Zeroizing;

const KEY_HEADER_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionEntry {
    pub connected: bool,
    pub auto_connected: bool,
    pub blocked: bool,
    pub circles: Vec<Uuid>,
    /// Base64 key shared with the recipient; key headers are re-wrapped
    /// with it.
    pub shared_secret: Option<String>,
    /// Base64 credential presented to the recipient host.
    pub client_auth_token: Option<String>,
}

/// Reader over a tenant's `connections.json`.
#[derive(Clone)]
pub struct LocalConnections {
    path: PathBuf,
}

impl LocalConnections {
    pub fn new(tenant_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: tenant_dir.into().join("connections.json"),
        }
    }

    async fn load(&self) -> Result<HashMap<Recipient, ConnectionEntry>, StorageError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map_err(|e| StorageError::Malformed(format!("connections.json: {e}")))
    }

    async fn entry(&self, recipient: &Recipient) -> Result<Option<ConnectionEntry>, StorageError> {
        Ok(self.load().await?.remove(recipient))
    }
}

#[async_trait]
impl ConnectionDirectory for LocalConnections {
    async fn standing(&self, recipient: &Recipient) -> Result<RecipientStanding, StorageError> {
        Ok(match self.entry(recipient).await? {
            Some(entry) => RecipientStanding {
                connected: entry.connected,
                auto_connected: entry.auto_connected,
                blocked: entry.blocked,
                circles: entry.circles,
            },
            None => RecipientStanding::default(),
        })
    }
}

/// Crypto collaborator backed by the host sealing key.
///
/// File key headers are stored sealed with the host key. For a transfer the
/// header is opened and sealed again with the connection's shared secret.
/// Client tokens are sealed with the host key while they wait in the queue.
pub struct LocalTransferCrypto {
    host_key: SealingKey,
    connections: LocalConnections,
}

impl LocalTransferCrypto {
    pub fn new(host_key: SealingKey, connections: LocalConnections) -> Self {
        Self { host_key, connections }
    }

    async fn connection(&self, recipient: &Recipient) -> Result<ConnectionEntry, CryptoError> {
        match self.connections.entry(recipient).await {
            Ok(Some(entry)) if entry.connected && !entry.blocked => Ok(entry),
            Ok(_) => Err(CryptoError::KeyUnavailable(format!("no active connection to {recipient}"))),
            Err(e) => Err(CryptoError::KeyUnavailable(e.to_string())),
        }
    }
}

fn decode_b64(field: &str, value: Option<&str>) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let value = value.ok_or_else(|| CryptoError::KeyUnavailable(format!("{field} missing")))?;
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::KeyUnavailable(format!("{field} is not base64")))
}

/// Split a `nonce || ciphertext` blob into a key header.
fn key_header_from_sealed(mut sealed: Vec<u8>) -> EncryptedKeyHeader {
    let encrypted_aes_key = sealed.split_off(SEALING_NONCE_SIZE.min(sealed.len()));
    EncryptedKeyHeader {
        encryption_version: KEY_HEADER_VERSION,
        iv: sealed,
        encrypted_aes_key,
    }
}

fn sealed_from_key_header(header: &EncryptedKeyHeader) -> Vec<u8> {
    let mut sealed = Vec::with_capacity(header.iv.len() + header.encrypted_aes_key.len());
    sealed.extend_from_slice(&header.iv);
    sealed.extend_from_slice(&header.encrypted_aes_key);
    sealed
}

/// Seal `key` with the host key in the layout stored in file headers.
#[cfg(test)]
pub fn seal_key_header(host_key: &SealingKey, key: &[u8]) -> Result<EncryptedKeyHeader, CryptoError> {
    let sealed = host_key
        .seal(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(key_header_from_sealed(sealed))
}

#[async_trait]
impl TransferCrypto for LocalTransferCrypto {
    async fn wrap_key_header(
        &self,
        header: &ServerFileHeader,
        recipient: &Recipient,
    ) -> Result<EncryptedKeyHeader, CryptoError> {
        let entry = self.connection(recipient).await?;
        let secret = decode_b64("sharedSecret", entry.shared_secret.as_deref())?;
        let shared = SealingKey::from_bytes(&secret).map_err(|e| CryptoError::KeyUnavailable(e.to_string()))?;

        let Some(stored) = &header.encrypted_key_header else {
            // Unencrypted files carry an empty header.
            return Ok(EncryptedKeyHeader {
                encryption_version: KEY_HEADER_VERSION,
                iv: Vec::new(),
                encrypted_aes_key: Vec::new(),
            });
        };

        let aes_key = self
            .host_key
            .open(&sealed_from_key_header(stored))
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let resealed = shared
            .seal(&aes_key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(key_header_from_sealed(resealed))
    }

    async fn client_auth_token_for(&self, recipient: &Recipient) -> Result<EncryptedClientAuthToken, CryptoError> {
        let entry = self.connection(recipient).await?;
        let token = decode_b64("clientAuthToken", entry.client_auth_token.as_deref())?;
        let sealed = self
            .host_key
            .seal(&token)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        Ok(EncryptedClientAuthToken::new(sealed))
    }

    fn unwrap_client_auth_token(&self, sealed: &EncryptedClientAuthToken) -> Result<ClientAuthToken, CryptoError> {
        let mut plain = self
            .host_key
            .open(sealed.as_bytes())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(ClientAuthToken::new(std::mem::take(&mut *plain)))
    }
}
