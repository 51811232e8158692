//! Sending a transfer body to a recipient host.
//!
//! The plaintext client token lives in zeroizing buffers up to the
//! `Authorization` header. The header value itself, and whatever reqwest
//! and hyper copy it into while writing the request, are plain `Bytes`
//! that are freed but not wiped. The value is marked sensitive so it never
//! shows up in `Debug` output or logs.

use crate::crypto::ClientAuthToken;
use crate::error::DeliveryResult;
use crate::wire::{OutgoingPart, PartBody, PeerTransferResponse, TransferBody};
use async_trait::async_trait;
use peer_outbox::Recipient;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// What came back from one transmission, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitOutcome {
    Response {
        status: u16,
        /// Parsed body, when it was valid JSON.
        body: Option<PeerTransferResponse>,
    },
    Timeout,
    /// Connection refused, DNS failure or the request could not be sent.
    Unreachable(String),
    Canceled,
    /// Anything else, including a body that failed to encode.
    Failed(String),
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send `body` to `recipient`. The token is borrowed for the call only.
    async fn transmit(&self, recipient: &Recipient, token: &ClientAuthToken, body: TransferBody) -> TransmitOutcome;
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub scheme: String,
    pub port: Option<u16>,
    pub path: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Pin recipient hosts to fixed addresses instead of resolving them.
    pub resolve_overrides: Vec<(String, SocketAddr)>,
    /// Honor `HTTPS_PROXY` and friends.
    pub use_system_proxy: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            port: None,
            path: "/api/peer/v1/transfer".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            resolve_overrides: Vec::new(),
            use_system_proxy: true,
        }
    }
}

/// Multipart-over-HTTPS transport.
pub struct HttpPeerTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpPeerTransport {
    pub fn new(config: HttpTransportConfig) -> DeliveryResult<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        for (host, addr) in &config.resolve_overrides {
            builder = builder.resolve(host, *addr);
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }

    /// Transfer endpoint on the recipient host.
    pub fn endpoint(&self, recipient: &Recipient) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!("{}://{}", self.config.scheme, recipient))?;
        if let Some(port) = self.config.port {
            url.set_port(Some(port)).map_err(|_| url::ParseError::InvalidPort)?;
        }
        url.set_path(&self.config.path);
        Ok(url)
    }

    fn form(body: TransferBody) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for OutgoingPart {
            kind,
            file_name,
            content_type,
            body,
        } in body.into_parts()
        {
            let part = match body {
                PartBody::Json(bytes) => Part::bytes(bytes.to_vec()),
                PartBody::Stream { stream, length: Some(len) } => {
                    Part::stream_with_length(reqwest::Body::wrap_stream(stream), len)
                }
                PartBody::Stream { stream, length: None } => Part::stream(reqwest::Body::wrap_stream(stream)),
            };
            form = form.part(kind.name(), part.file_name(file_name).mime_str(&content_type)?);
        }
        Ok(form)
    }
}

/// Sensitive `Bearer` header for `token`. The intermediate string is wiped
/// on return; the header's own copy is not.
fn authorization_header(token: &ClientAuthToken) -> Option<HeaderValue> {
    let bearer = token.bearer();
    let mut value = HeaderValue::from_bytes(bearer.as_bytes()).ok()?;
    value.set_sensitive(true);
    Some(value)
}

fn outcome_for_error(e: &reqwest::Error) -> TransmitOutcome {
    if e.is_timeout() {
        TransmitOutcome::Timeout
    } else if e.is_connect() || e.is_request() {
        TransmitOutcome::Unreachable(e.to_string())
    } else {
        TransmitOutcome::Failed(e.to_string())
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn transmit(&self, recipient: &Recipient, token: &ClientAuthToken, body: TransferBody) -> TransmitOutcome {
        let url = match self.endpoint(recipient) {
            Ok(url) => url,
            Err(e) => return TransmitOutcome::Failed(format!("invalid endpoint: {}", e)),
        };
        let form = match Self::form(body) {
            Ok(form) => form,
            Err(e) => return TransmitOutcome::Failed(e.to_string()),
        };

        let auth = match authorization_header(token) {
            Some(value) => value,
            None => return TransmitOutcome::Failed("client token is not a valid header value".to_string()),
        };

        debug!(recipient = %recipient, url = %url, "Transmitting transfer");
        let response = match self
            .client
            .post(url)
            .header(AUTHORIZATION, auth)
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return outcome_for_error(&e),
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => serde_json::from_slice::<PeerTransferResponse>(&bytes).ok(),
            Err(e) => {
                debug!(recipient = %recipient, status, error = %e, "Failed to read response body");
                None
            }
        };
        TransmitOutcome::Response { status, body }
    }
}
