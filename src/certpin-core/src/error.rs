//! Error types for pinning operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while registering pins or issuing pinned requests.
#[derive(Debug, Error)]
pub enum PinError {
    /// Registration arguments were missing or empty.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// Fingerprint directory or file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No fingerprint is registered for the host being connected to.
    #[error(
        "SSL authorization failed. URL: {host} does not have a valid fingerprint which can be \
         used to verify the SSL certificate."
    )]
    DomainInvalid {
        /// Host that had no pin.
        host: String,
    },

    /// The transport's own TLS validation rejected the peer.
    #[error("SSL authorization failed. URL to {host} is not authorized for SSL.")]
    NotAuthorized {
        /// Host whose certificate was rejected.
        host: String,
    },

    /// A fingerprint is registered but the certificate does not match it (or the pin is malformed).
    #[error(
        "SSL authorization failed. URL to {host} is not authorized for SSL. Mismatched SSL \
         fingerprint. This likely means that the URL doesn't point to the expected server or \
         there is an unexpected man-in-the-middle."
    )]
    FingerprintMismatch {
        /// Host whose certificate did not match.
        host: String,
    },

    /// Transport-level HTTPS failure unrelated to pinning.
    #[error("HTTPS error: {message}")]
    Https {
        /// Error message.
        message: String,
    },

    /// The first-use initialization could not complete.
    #[error("Initialization error: {message}")]
    Initialization {
        /// Error message.
        message: String,
    },
}

impl PinError {
    /// Stable identifier for pin outcomes, `None` for local or transport failures.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::DomainInvalid { .. } => Some("request.ssl.security.domain.invalid"),
            Self::NotAuthorized { .. } => Some("request.ssl.security.domain.notauthorized"),
            Self::FingerprintMismatch { .. } => {
                Some("request.ssl.security.domain.fingerprint.mismatch")
            },
            _ => None,
        }
    }

    /// Check if this error is a per-request pinning verdict.
    #[must_use]
    pub fn is_pin_failure(&self) -> bool {
        matches!(
            self,
            Self::DomainInvalid { .. } | Self::NotAuthorized { .. } | Self::FingerprintMismatch { .. }
        )
    }

    /// Host the pinning verdict applies to.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::DomainInvalid { host }
            | Self::NotAuthorized { host }
            | Self::FingerprintMismatch { host } => Some(host),
            _ => None,
        }
    }
}
