//! # certpin-core
//!
//! TLS certificate pinning for outbound HTTPS requests. A request succeeds
//! only if the certificate the responding server presents matches the SHA-1
//! fingerprint registered for that server's domain, even when the system
//! trust store would have accepted a forged certificate.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PinnedClient                             │
//! │                                                              │
//! │  ┌──────────────┐  ┌─────────────────────┐                  │
//! │  │ InitBarrier  │  │ FingerprintRegistry │                  │
//! │  │ (hooks, once)│  │ (exact + wildcard)  │                  │
//! │  └──────────────┘  └─────────────────────┘                  │
//! │         │                     │                              │
//! │         ▼                     ▼                              │
//! │  ┌──────────────────────────────────────────────────┐       │
//! │  │              VerificationContext                  │       │
//! │  │   (handshake → redirect → response, settles once)│       │
//! │  └──────────────────────────────────────────────────┘       │
//! │                           ▲                                  │
//! │                           │ events / abort                   │
//! │  ┌──────────────────────────────────────────────────┐       │
//! │  │        Transport (HttpsTransport: reqwest)        │       │
//! │  └──────────────────────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use certpin_core::{Hook, PinConfig, PinnedClient};
//!
//! # async fn run() -> Result<(), certpin_core::PinError> {
//! let client = PinnedClient::new(PinConfig::default())?;
//! client.registry().register(
//!     "*.example.com",
//!     "9C:A2:2B:30:1A:A8:F9:FC:A7:9D:E5:84:1E:E0:C9:42:C6:9A:6D:A3",
//! )?;
//! client.register_hook(Hook::sync(|| println!("first request coming up")));
//!
//! let response = client.get("https://www.example.com/").await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! - **Fail-closed**: no pin, a malformed pin, or a missing certificate all reject
//! - **Final host**: the pin is checked against the host that answered, after redirects
//! - **No downgrade**: a pinned request that redirects to plain `http` is rejected
//! - **No body on failure**: a rejected exchange is dropped before its body is read
//!
//! Certificate chain, expiry and revocation checks are left to the transport's
//! trust store; pinning only adds the fingerprint comparison.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod barrier;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod https;
pub mod registry;
pub mod transport;
pub mod verification;

pub use barrier::{BarrierState, Continuation, Hook, InitBarrier};
pub use client::PinnedClient;
pub use config::{MinTlsVersion, PinConfig};
pub use error::PinError;
pub use https::HttpsTransport;
pub use registry::FingerprintRegistry;
pub use transport::{
    Control, Exchange, HandshakeEvent, Passthrough, PinnedRequest, PinnedResponse, RedirectEvent,
    ResponseEvent, Transport, TransportObserver,
};
pub use verification::{PinFailure, Verdict, VerificationContext, VerificationState};
