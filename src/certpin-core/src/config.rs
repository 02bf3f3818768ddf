//! Configuration for pinned clients.

use std::path::PathBuf;
use std::time::Duration;

/// Lowest TLS protocol version the HTTPS transport will negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinTlsVersion {
    /// Accept TLS 1.2 and 1.3.
    #[default]
    Tls12,
    /// Accept TLS 1.3 only.
    Tls13,
}

/// Configuration for a [`PinnedClient`](crate::PinnedClient).
#[derive(Debug, Clone)]
pub struct PinConfig {
    /// Total request timeout.
    pub timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Maximum redirect hops followed for one logical request.
    pub max_redirects: usize,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Minimum TLS protocol version.
    pub min_tls_version: MinTlsVersion,
    /// Directory of fingerprint files loaded when the client is built.
    pub fingerprint_dir: Option<PathBuf>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(3),
            max_redirects: 10,
            user_agent: format!("certpin/{}", env!("CARGO_PKG_VERSION")),
            min_tls_version: MinTlsVersion::default(),
            fingerprint_dir: None,
        }
    }
}
