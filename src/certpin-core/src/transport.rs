//! Contract between the pinning core and an HTTP/TLS transport.
//!
//! A transport performs one logical request (following redirects itself) and
//! reports what it sees to a [`TransportObserver`]:
//!
//! ```text
//!   on_handshake ──► on_redirect ──► on_handshake ──► on_response ──► body
//!        │                │                │               │
//!        └──── Abort ─────┴──── Abort ─────┴──── Abort ────┴──► Exchange::Aborted
//! ```
//!
//! Returning [`Control::Abort`] from any callback tears the exchange down
//! immediately; the response body is never read. Handshake events for a hop
//! are always reported before that hop's redirect or response event.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::PinError;

/// TLS handshake completed (or failed certificate validation) for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeEvent {
    /// Server name the handshake was made for.
    pub host: String,
    /// Whether the channel is TLS-protected at all.
    pub secured: bool,
    /// Whether the transport's trust store accepted the peer certificate.
    pub authorized: bool,
    /// SHA-1 fingerprint of the peer's leaf certificate.
    pub fingerprint: Option<String>,
}

/// The transport is about to follow a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectEvent {
    /// URL that answered with a redirect.
    pub from: Url,
    /// URL the transport will request next.
    pub to: Url,
    /// Redirect status code.
    pub status: u16,
}

/// Final (non-redirect) response headers arrived; the body has not been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEvent {
    /// URL that produced the response, after all redirects.
    pub url: Url,
    /// Response status code.
    pub status: u16,
    /// SHA-1 fingerprint of the certificate on the connection that carried the response.
    pub fingerprint: Option<String>,
}

/// Observer verdict for a transport event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep going.
    Continue,
    /// Tear the exchange down now.
    Abort,
}

/// Receives transport events for one logical request.
pub trait TransportObserver: Send {
    /// A TLS handshake finished.
    fn on_handshake(&mut self, event: &HandshakeEvent) -> Control;

    /// A redirect is about to be followed.
    fn on_redirect(&mut self, event: &RedirectEvent) -> Control;

    /// Final response headers arrived.
    fn on_response(&mut self, event: &ResponseEvent) -> Control;
}

/// Observer for unpinned requests: accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl TransportObserver for Passthrough {
    fn on_handshake(&mut self, _event: &HandshakeEvent) -> Control {
        Control::Continue
    }

    fn on_redirect(&mut self, _event: &RedirectEvent) -> Control {
        Control::Continue
    }

    fn on_response(&mut self, _event: &ResponseEvent) -> Control {
        Control::Continue
    }
}

/// An outbound request, optionally carrying a per-request fingerprint override.
#[derive(Debug, Clone)]
pub struct PinnedRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Fingerprint to pin instead of the registry entry.
    pub fingerprint: Option<String>,
}

impl PinnedRequest {
    /// Create a request, parsing `url`.
    pub fn new(method: Method, url: &str) -> Result<Self, PinError> {
        let url = Url::parse(url).map_err(|e| PinError::InvalidInput {
            message: format!("invalid url {url:?}: {e}"),
        })?;
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            fingerprint: None,
        })
    }

    /// Create a GET request.
    pub fn get(url: &str) -> Result<Self, PinError> {
        Self::new(Method::GET, url)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Pin this request to `fingerprint` regardless of the registry.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Check if the request targets an `https` URL.
    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }
}

/// A fully received response.
#[derive(Debug, Clone)]
pub struct PinnedResponse {
    /// Status code.
    pub status: StatusCode,
    /// URL that produced the response, after redirects.
    pub url: Url,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
}

impl PinnedResponse {
    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// How a transport exchange ended.
#[derive(Debug)]
pub enum Exchange {
    /// The observer let the response through and the body was read.
    Completed(PinnedResponse),
    /// The observer aborted the exchange.
    Aborted,
}

/// An HTTP/TLS transport that reports events to an observer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform `request`, following redirects, reporting every event to `observer`.
    async fn execute(
        &self,
        request: &PinnedRequest,
        observer: &mut dyn TransportObserver,
    ) -> Result<Exchange, PinError>;
}
