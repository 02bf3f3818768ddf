//! Per-request pin verification.
//!
//! A [`VerificationContext`] is attached to one logical HTTPS request as its
//! [`TransportObserver`]. It settles exactly once:
//!
//! ```text
//! AwaitingHandshake ──handshake ok──► AwaitingResponse ──response──► Settled(Pass | Fail)
//!        │                              ▲        │
//!        │                              └redirect┘
//!        └──handshake rejected──────────────────────────────────────► Settled(Fail)
//! ```
//!
//! The pin is checked against the host that produced the final response, not
//! the host originally requested, since redirects may move the request.
//! Once settled, further events change nothing and keep receiving the same
//! [`Control`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain;
use crate::error::PinError;
use crate::fingerprint;
use crate::registry::FingerprintRegistry;
use crate::transport::{Control, HandshakeEvent, RedirectEvent, ResponseEvent, TransportObserver};

/// Why a pinned request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PinFailure {
    /// No fingerprint registered for the responding host.
    DomainInvalid {
        /// Responding host.
        host: String,
    },
    /// The transport's trust store rejected the peer.
    NotAuthorized {
        /// Host of the rejected connection.
        host: String,
    },
    /// Registered fingerprint is malformed or differs from the certificate.
    FingerprintMismatch {
        /// Responding host.
        host: String,
    },
}

impl From<PinFailure> for PinError {
    fn from(failure: PinFailure) -> Self {
        match failure {
            PinFailure::DomainInvalid { host } => Self::DomainInvalid { host },
            PinFailure::NotAuthorized { host } => Self::NotAuthorized { host },
            PinFailure::FingerprintMismatch { host } => Self::FingerprintMismatch { host },
        }
    }
}

/// Terminal decision for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Certificate matched the pin.
    Pass,
    /// Request rejected.
    Fail(PinFailure),
}

impl Verdict {
    fn control(&self) -> Control {
        match self {
            Self::Pass => Control::Continue,
            Self::Fail(_) => Control::Abort,
        }
    }
}

/// Position in the verification state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationState {
    /// Nothing observed yet.
    AwaitingHandshake,
    /// Handshake accepted or redirect followed; waiting for the final response.
    AwaitingResponse,
    /// Decision made.
    Settled(Verdict),
}

/// Verification state for one logical pinned request.
#[derive(Debug)]
pub struct VerificationContext {
    original_url: Url,
    current_host: String,
    override_fingerprint: Option<String>,
    expected_fingerprint: Option<String>,
    registry: Arc<FingerprintRegistry>,
    state: VerificationState,
    responded: bool,
}

impl VerificationContext {
    /// Start verifying a request to `url`.
    ///
    /// `override_fingerprint`, when given, is pinned instead of the registry entry.
    pub fn new(
        url: Url,
        registry: Arc<FingerprintRegistry>,
        override_fingerprint: Option<String>,
    ) -> Self {
        let current_host = domain::normalize(&url);
        Self {
            original_url: url,
            current_host,
            override_fingerprint: override_fingerprint.map(|fp| fingerprint::normalize(&fp)),
            expected_fingerprint: None,
            registry,
            state: VerificationState::AwaitingHandshake,
            responded: false,
        }
    }

    /// URL the request started with.
    pub fn original_url(&self) -> &Url {
        &self.original_url
    }

    /// Host currently being talked to.
    pub fn current_host(&self) -> &str {
        &self.current_host
    }

    /// Fingerprint resolved for the responding host, once a response arrived.
    pub fn expected_fingerprint(&self) -> Option<&str> {
        self.expected_fingerprint.as_deref()
    }

    /// Current state.
    pub fn state(&self) -> &VerificationState {
        &self.state
    }

    /// Decision, if one was made.
    pub fn verdict(&self) -> Option<&Verdict> {
        match &self.state {
            VerificationState::Settled(verdict) => Some(verdict),
            _ => None,
        }
    }

    /// Check if a decision was made.
    pub fn is_settled(&self) -> bool {
        self.verdict().is_some()
    }

    /// Host that produced the final response, if one arrived.
    pub fn responding_host(&self) -> Option<&str> {
        self.responded.then_some(self.current_host.as_str())
    }

    /// Consume the context, returning its decision.
    pub fn into_verdict(self) -> Option<Verdict> {
        match self.state {
            VerificationState::Settled(verdict) => Some(verdict),
            _ => None,
        }
    }

    fn settle(&mut self, verdict: Verdict) -> Control {
        match &verdict {
            Verdict::Pass => info!(host = %self.current_host, "Certificate pin verified"),
            Verdict::Fail(failure) => {
                warn!(host = %self.current_host, failure = ?failure, "Certificate pin rejected")
            },
        }
        let control = verdict.control();
        self.state = VerificationState::Settled(verdict);
        control
    }

    fn check_response(&self, actual: Option<&str>) -> Verdict {
        let host = self.current_host.clone();
        let Some(expected) = self.expected_fingerprint.as_deref() else {
            return Verdict::Fail(PinFailure::DomainInvalid { host });
        };

        // A malformed pin can never match a real certificate.
        if !fingerprint::is_well_formed(expected) {
            debug!(host = %host, expected = %expected, "Registered fingerprint is malformed");
            return Verdict::Fail(PinFailure::FingerprintMismatch { host });
        }

        match actual.map(fingerprint::normalize) {
            Some(actual) if fingerprint::matches(expected, &actual) => Verdict::Pass,
            actual => {
                debug!(
                    host = %host,
                    expected = %expected,
                    actual = ?actual,
                    "Server fingerprint does not match"
                );
                Verdict::Fail(PinFailure::FingerprintMismatch { host })
            },
        }
    }
}

impl TransportObserver for VerificationContext {
    fn on_handshake(&mut self, event: &HandshakeEvent) -> Control {
        if let Some(verdict) = self.verdict() {
            return verdict.control();
        }

        debug!(
            host = %event.host,
            authorized = event.authorized,
            fingerprint = ?event.fingerprint,
            "TLS handshake observed"
        );

        if !event.secured || !event.authorized {
            return self.settle(Verdict::Fail(PinFailure::NotAuthorized {
                host: event.host.clone(),
            }));
        }

        // The pin is checked once the final response arrives.
        self.state = VerificationState::AwaitingResponse;
        Control::Continue
    }

    fn on_redirect(&mut self, event: &RedirectEvent) -> Control {
        if let Some(verdict) = self.verdict() {
            return verdict.control();
        }

        let next_host = domain::normalize(&event.to);
        debug!(from = %event.from, to = %event.to, "Following redirect");

        if event.to.scheme() != "https" {
            self.current_host = next_host.clone();
            return self.settle(Verdict::Fail(PinFailure::NotAuthorized { host: next_host }));
        }

        self.current_host = next_host;
        self.expected_fingerprint = None;
        self.state = VerificationState::AwaitingResponse;
        Control::Continue
    }

    fn on_response(&mut self, event: &ResponseEvent) -> Control {
        if let Some(verdict) = self.verdict() {
            return verdict.control();
        }

        self.responded = true;
        self.current_host = domain::normalize(&event.url);
        self.expected_fingerprint = self
            .override_fingerprint
            .clone()
            .or_else(|| self.registry.lookup(self.current_host.as_str()));

        debug!(
            host = %self.current_host,
            original = %self.original_url,
            expected = ?self.expected_fingerprint,
            actual = ?event.fingerprint,
            "Checking certificate pin"
        );

        let verdict = self.check_response(event.fingerprint.as_deref());
        self.settle(verdict)
    }
}
