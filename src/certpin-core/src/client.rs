//! Pinned request facade.
//!
//! [`PinnedClient`] ties the pieces together for one logical request:
//!
//! 1. wait for the [`InitBarrier`] (first use drains the registered hooks);
//! 2. plain `http` requests go straight to the transport, unverified;
//! 3. `https` requests get a fresh [`VerificationContext`] observing the
//!    transport, and resolve to the response only if the pin held.
//!
//! Clones share the registry, barrier and transport, so a single client built
//! at startup and cloned into every call site gives the whole process one set
//! of pins and one initialization pass.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, instrument};
use url::Url;

use crate::barrier::{Hook, InitBarrier};
use crate::config::PinConfig;
use crate::domain;
use crate::error::PinError;
use crate::https::HttpsTransport;
use crate::registry::FingerprintRegistry;
use crate::transport::{
    Control, Exchange, HandshakeEvent, Passthrough, PinnedRequest, PinnedResponse, RedirectEvent,
    ResponseEvent, Transport, TransportObserver,
};
use crate::verification::{Verdict, VerificationContext};

/// HTTPS client that enforces certificate pins.
#[derive(Clone)]
pub struct PinnedClient {
    registry: Arc<FingerprintRegistry>,
    barrier: Arc<InitBarrier>,
    transport: Arc<dyn Transport>,
    last_url: Arc<Mutex<Option<String>>>,
}

impl PinnedClient {
    /// Build a client over the HTTPS transport, loading `config.fingerprint_dir` if set.
    pub fn new(config: PinConfig) -> Result<Self, PinError> {
        let transport = HttpsTransport::new(&config)?;
        let client = Self::with_parts(
            Arc::new(FingerprintRegistry::new()),
            Arc::new(InitBarrier::new()),
            Arc::new(transport),
        );

        if let Some(dir) = &config.fingerprint_dir {
            client.registry.load_directory(dir)?;
        }
        Ok(client)
    }

    /// Build a client from shared parts.
    pub fn with_parts(
        registry: Arc<FingerprintRegistry>,
        barrier: Arc<InitBarrier>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            barrier,
            transport,
            last_url: Arc::new(Mutex::new(None)),
        }
    }

    /// Pins consulted by this client.
    pub fn registry(&self) -> &Arc<FingerprintRegistry> {
        &self.registry
    }

    /// Barrier gating this client's first request.
    pub fn barrier(&self) -> &Arc<InitBarrier> {
        &self.barrier
    }

    /// Register a hook to run before the first pinned request.
    pub fn register_hook(&self, hook: Hook) {
        self.barrier.register_hook(hook);
    }

    /// Last pinned URL, as `https://<host>` once a response was seen.
    pub fn last_url(&self) -> Option<String> {
        self.last_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget the last pinned URL.
    pub fn reset_last_url(&self) {
        self.set_last_url(None);
    }

    fn set_last_url(&self, url: Option<String>) {
        *self.last_url.lock().unwrap_or_else(PoisonError::into_inner) = url;
    }

    /// GET `url`.
    pub async fn get(&self, url: &str) -> Result<PinnedResponse, PinError> {
        self.execute(PinnedRequest::get(url)?).await
    }

    /// Perform `request`, enforcing the pin when it is `https`.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: PinnedRequest) -> Result<PinnedResponse, PinError> {
        self.barrier.enter().await?;

        if !request.is_https() {
            debug!("Plain request, pinning not applied");
            self.set_last_url(None);
            return match self.transport.execute(&request, &mut Passthrough).await? {
                Exchange::Completed(response) => Ok(response),
                Exchange::Aborted => Err(PinError::Https {
                    message: format!("Request to {} was aborted", request.url),
                }),
            };
        }

        self.set_last_url(Some(request.url.to_string()));
        let mut context = VerificationContext::new(
            request.url.clone(),
            Arc::clone(&self.registry),
            request.fingerprint.clone(),
        );
        let exchange = self.transport.execute(&request, &mut context).await;

        if let Some(host) = context.responding_host() {
            self.set_last_url(Some(format!("https://{}", host)));
        }

        match (context.into_verdict(), exchange) {
            // The verdict wins over whatever the transport reported after it.
            (Some(Verdict::Fail(failure)), _) => Err(failure.into()),
            (_, Err(e)) => Err(e),
            (Some(Verdict::Pass), Ok(Exchange::Completed(response))) => Ok(response),
            (Some(Verdict::Pass), Ok(Exchange::Aborted)) => Err(PinError::Https {
                message: format!("Request to {} was aborted", request.url),
            }),
            (None, Ok(_)) => Err(PinError::Https {
                message: format!("No response observed for {}", request.url),
            }),
        }
    }

    /// Fingerprint for `url`: the registered pin if there is one, else what the server presents.
    ///
    /// `url` may be a full URL or a bare host. The probe connection is
    /// dropped as soon as the response headers arrive.
    #[instrument(skip(self))]
    pub async fn fingerprint_for_url(&self, url: &str) -> Result<String, PinError> {
        if let Some(found) = self.registry.lookup(url) {
            return Ok(found);
        }

        let target = match Url::parse(url) {
            Ok(parsed) if parsed.has_host() => parsed,
            _ => {
                let host = domain::normalize(url);
                Url::parse(&format!("https://{}/", host)).map_err(|e| PinError::InvalidInput {
                    message: format!("invalid host {:?}: {}", host, e),
                })?
            },
        };

        self.barrier.enter().await?;

        let request = PinnedRequest::get(target.as_str())?;
        let mut probe = FingerprintProbe::default();
        let outcome = self.transport.execute(&request, &mut probe).await;

        if let Some(host) = probe.rejected {
            return Err(PinError::NotAuthorized { host });
        }
        match (probe.fingerprint, outcome) {
            (Some(fingerprint), _) => {
                info!(url = %target, fingerprint = %fingerprint, "Fetched server fingerprint");
                Ok(fingerprint)
            },
            (None, Err(e)) => Err(e),
            (None, Ok(_)) => Err(PinError::Https {
                message: format!("No certificate presented by {}", target),
            }),
        }
    }
}

impl std::fmt::Debug for PinnedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedClient")
            .field("pins", &self.registry.len())
            .field("barrier", &self.barrier)
            .field("last_url", &self.last_url())
            .finish()
    }
}

/// Observer that captures the final response's certificate and stops.
#[derive(Debug, Default)]
struct FingerprintProbe {
    fingerprint: Option<String>,
    rejected: Option<String>,
}

impl TransportObserver for FingerprintProbe {
    fn on_handshake(&mut self, event: &HandshakeEvent) -> Control {
        if event.authorized {
            Control::Continue
        } else {
            self.rejected = Some(event.host.clone());
            Control::Abort
        }
    }

    fn on_redirect(&mut self, _event: &RedirectEvent) -> Control {
        Control::Continue
    }

    fn on_response(&mut self, event: &ResponseEvent) -> Control {
        self.fingerprint = event.fingerprint.clone();
        Control::Abort
    }
}
