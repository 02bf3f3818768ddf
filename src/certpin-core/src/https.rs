//! HTTPS transport over `reqwest` + `rustls`.
//!
//! Every logical request gets its own client whose certificate verifier
//! records each handshake: the trust-store verdict from `webpki` and the
//! SHA-1 fingerprint of the leaf certificate. Untrusted peers still fail the
//! handshake, so no request bytes ever reach them; the recorded event lets
//! the observer report the rejection as a pinning outcome.
//!
//! Redirects are followed here rather than by `reqwest`, so every hop is
//! reported to the observer before it is taken.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE, LOCATION, PROXY_AUTHORIZATION};
use reqwest::redirect::Policy;
use reqwest::tls::TlsInfo;
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion,
};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{MinTlsVersion, PinConfig};
use crate::domain;
use crate::error::PinError;
use crate::fingerprint;
use crate::transport::{
    Control, Exchange, HandshakeEvent, PinnedRequest, PinnedResponse, RedirectEvent,
    ResponseEvent, Transport, TransportObserver,
};

type HandshakeLog = Arc<Mutex<Vec<HandshakeEvent>>>;

/// Certificate verifier that defers to `webpki` and records what it saw.
#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    log: HandshakeLog,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let result =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);

        let event = HandshakeEvent {
            host: server_name.to_str().to_ascii_lowercase(),
            secured: true,
            authorized: result.is_ok(),
            fingerprint: Some(fingerprint::from_der(end_entity.as_ref())),
        };
        if let Err(e) = &result {
            warn!(host = %event.host, error = %e, "Peer certificate rejected by trust store");
        }
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);

        result
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// [`Transport`] backed by `reqwest` with a recording `rustls` verifier.
pub struct HttpsTransport {
    config: PinConfig,
    provider: Arc<CryptoProvider>,
    verifier: Arc<WebPkiServerVerifier>,
}

impl HttpsTransport {
    /// Create a transport trusting the bundled Mozilla roots.
    pub fn new(config: &PinConfig) -> Result<Self, PinError> {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(config, roots)
    }

    /// Create a transport trusting `roots` instead of the bundled set.
    pub fn with_roots(config: &PinConfig, roots: RootCertStore) -> Result<Self, PinError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()
                .map_err(|e| PinError::Https {
                    message: format!("Failed to build certificate verifier: {}", e),
                })?;

        Ok(Self {
            config: config.clone(),
            provider,
            verifier,
        })
    }

    fn protocol_versions(&self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS12_AND_UP: &[&SupportedProtocolVersion] =
            &[&rustls::version::TLS13, &rustls::version::TLS12];
        static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

        match self.config.min_tls_version {
            MinTlsVersion::Tls12 => TLS12_AND_UP,
            MinTlsVersion::Tls13 => TLS13_ONLY,
        }
    }

    /// Build a client whose handshakes land in `log`.
    fn client_for(&self, log: HandshakeLog) -> Result<Client, PinError> {
        let verifier = RecordingVerifier {
            inner: Arc::clone(&self.verifier),
            log,
        };

        let tls = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_protocol_versions(self.protocol_versions())
            .map_err(|e| PinError::Https {
                message: format!("Failed to configure TLS: {}", e),
            })?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        ClientBuilder::new()
            .use_preconfigured_tls(tls)
            .tls_info(true)
            .redirect(Policy::none())
            .timeout(self.config.timeout)
            .connect_timeout(self.config.connect_timeout)
            .user_agent(self.config.user_agent.clone())
            .build()
            .map_err(|e| PinError::Https {
                message: format!("Failed to create HTTP client: {}", e),
            })
    }

    /// Report handshakes recorded since the last call.
    fn report_handshakes(
        log: &HandshakeLog,
        reported: &mut usize,
        observer: &mut dyn TransportObserver,
    ) -> Control {
        let fresh: Vec<HandshakeEvent> = {
            let events = log.lock().unwrap_or_else(PoisonError::into_inner);
            events[*reported..].to_vec()
        };
        *reported += fresh.len();

        for event in &fresh {
            if observer.on_handshake(event) == Control::Abort {
                return Control::Abort;
            }
        }
        Control::Continue
    }
}

/// Where a 3xx response points, if anywhere.
fn redirect_target(current: &Url, response: &Response) -> Result<Option<Url>, PinError> {
    let Some(location) = response.headers().get(LOCATION) else {
        return Ok(None);
    };
    let location = location.to_str().map_err(|e| PinError::Https {
        message: format!("Invalid redirect location from {}: {}", current, e),
    })?;
    current.join(location).map(Some).map_err(|e| PinError::Https {
        message: format!("Invalid redirect location {:?} from {}: {}", location, current, e),
    })
}

#[async_trait]
impl Transport for HttpsTransport {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn execute(
        &self,
        request: &PinnedRequest,
        observer: &mut dyn TransportObserver,
    ) -> Result<Exchange, PinError> {
        let log: HandshakeLog = Arc::new(Mutex::new(Vec::new()));
        let client = self.client_for(Arc::clone(&log))?;
        let mut reported = 0;

        let mut url = request.url.clone();
        let mut method = request.method.clone();
        let mut headers = request.headers.clone();
        let mut body = request.body.clone();

        for _hop in 0..=self.config.max_redirects {
            let mut builder = client.request(method.clone(), url.clone()).headers(headers.clone());
            if let Some(bytes) = &body {
                builder = builder.body(bytes.clone());
            }

            let sent = builder.send().await;

            // Handshakes for this hop come before its response or failure.
            if Self::report_handshakes(&log, &mut reported, observer) == Control::Abort {
                debug!(url = %url, "Aborted after handshake");
                return Ok(Exchange::Aborted);
            }

            let response = sent.map_err(|e| {
                warn!(url = %url, error = %e, "HTTPS request failed");
                PinError::Https {
                    message: format!("Request to {} failed: {}", url, e),
                }
            })?;

            let status = response.status();
            let peer_fingerprint = response
                .extensions()
                .get::<TlsInfo>()
                .and_then(TlsInfo::peer_certificate)
                .map(fingerprint::from_der);

            if status.is_redirection() {
                if let Some(next) = redirect_target(&url, &response)? {
                    let event = RedirectEvent {
                        from: url.clone(),
                        to: next.clone(),
                        status: status.as_u16(),
                    };
                    if observer.on_redirect(&event) == Control::Abort {
                        return Ok(Exchange::Aborted);
                    }

                    if status == StatusCode::SEE_OTHER
                        || ((status == StatusCode::MOVED_PERMANENTLY
                            || status == StatusCode::FOUND)
                            && method == Method::POST)
                    {
                        method = Method::GET;
                        body = None;
                    }
                    if domain::host_of(&next) != domain::host_of(&url) {
                        headers.remove(AUTHORIZATION);
                        headers.remove(COOKIE);
                        headers.remove(PROXY_AUTHORIZATION);
                    }

                    url = next;
                    continue;
                }
            }

            let event = ResponseEvent {
                url: url.clone(),
                status: status.as_u16(),
                fingerprint: peer_fingerprint,
            };
            if observer.on_response(&event) == Control::Abort {
                // Dropping the response closes the connection unread.
                drop(response);
                return Ok(Exchange::Aborted);
            }

            let response_headers = response.headers().clone();
            let bytes = response.bytes().await.map_err(|e| PinError::Https {
                message: format!("Failed to read response from {}: {}", url, e),
            })?;

            return Ok(Exchange::Completed(PinnedResponse {
                status,
                url,
                headers: response_headers,
                body: bytes.to_vec(),
            }));
        }

        Err(PinError::Https {
            message: format!(
                "Too many redirects (more than {}) starting at {}",
                self.config.max_redirects, request.url
            ),
        })
    }
}
