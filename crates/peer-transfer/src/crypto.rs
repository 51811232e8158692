//! Key material seams.
//!
//! The outbox never sees a plaintext key header or auth token at rest. The
//! crypto collaborator re-wraps a file's key header for one recipient when
//! an item is enqueued and unseals the client auth token for exactly one
//! transmission.

use crate::drive::ServerFileHeader;
use crate::error::CryptoError;
use async_trait::async_trait;
use base64::Engine;
use peer_outbox::{EncryptedClientAuthToken, EncryptedKeyHeader, Recipient};
use std::fmt;
use zeroize::Zeroizing;

/// A plaintext client auth token. The buffer is wiped when dropped.
pub struct ClientAuthToken(Zeroizing<Vec<u8>>);

impl ClientAuthToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// `Bearer <base64>` header value; wiped when dropped like the token.
    pub fn bearer(&self) -> Zeroizing<String> {
        // Sized up front so the buffer never reallocates and leaves a copy behind.
        let mut value = Zeroizing::new(String::with_capacity(7 + self.0.len().div_ceil(3) * 4));
        value.push_str("Bearer ");
        base64::engine::general_purpose::STANDARD.encode_string(self.0.as_slice(), &mut *value);
        value
    }
}

impl fmt::Debug for ClientAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientAuthToken(<redacted>)")
    }
}

#[async_trait]
pub trait TransferCrypto: Send + Sync {
    /// Re-wrap the file's key header with the secret shared with `recipient`.
    async fn wrap_key_header(
        &self,
        header: &ServerFileHeader,
        recipient: &Recipient,
    ) -> Result<EncryptedKeyHeader, CryptoError>;

    /// Sealed credential for the connection to `recipient`.
    async fn client_auth_token_for(&self, recipient: &Recipient) -> Result<EncryptedClientAuthToken, CryptoError>;

    fn unwrap_client_auth_token(&self, sealed: &EncryptedClientAuthToken) -> Result<ClientAuthToken, CryptoError>;
}
