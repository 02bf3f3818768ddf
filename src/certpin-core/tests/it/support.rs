//! Scripted transport for driving `PinnedClient` without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use certpin_core::{
    Control, Exchange, FingerprintRegistry, HandshakeEvent, InitBarrier, PinError, PinnedClient,
    PinnedRequest, PinnedResponse, RedirectEvent, ResponseEvent, Transport, TransportObserver,
};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use url::Url;

pub const FP_A: &str = "9C:A2:2B:30:1A:A8:F9:FC:A7:9D:E5:84:1E:E0:C9:42:C6:9A:6D:A3";
pub const FP_B: &str = "01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67";

/// What one hop of the scripted exchange does after its handshake.
#[derive(Debug, Clone)]
pub enum Outcome {
    Redirect(&'static str),
    Respond(u16, &'static str),
}

/// One connection: TLS properties plus what the server answers.
#[derive(Debug, Clone)]
pub struct Hop {
    pub authorized: bool,
    pub fingerprint: Option<&'static str>,
    pub outcome: Outcome,
}

impl Hop {
    pub fn respond(fingerprint: &'static str, body: &'static str) -> Self {
        Self {
            authorized: true,
            fingerprint: Some(fingerprint),
            outcome: Outcome::Respond(200, body),
        }
    }

    pub fn redirect(fingerprint: &'static str, to: &'static str) -> Self {
        Self {
            authorized: true,
            fingerprint: Some(fingerprint),
            outcome: Outcome::Redirect(to),
        }
    }

    pub fn unauthorized(mut self) -> Self {
        self.authorized = false;
        self
    }

    pub fn without_certificate(mut self) -> Self {
        self.fingerprint = None;
        self
    }
}

/// Replays a fixed list of hops for every request it is given.
#[derive(Default)]
pub struct ScriptedTransport {
    hops: Vec<Hop>,
    calls: AtomicUsize,
    body_read: AtomicBool,
    seen_urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(hops: Vec<Hop>) -> Arc<Self> {
        Arc::new(Self {
            hops,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn body_read(&self) -> bool {
        self.body_read.load(Ordering::SeqCst)
    }

    pub fn seen_urls(&self) -> Vec<String> {
        self.seen_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: &PinnedRequest,
        observer: &mut dyn TransportObserver,
    ) -> Result<Exchange, PinError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_urls.lock().unwrap().push(request.url.to_string());

        let mut url = request.url.clone();
        for hop in &self.hops {
            if url.scheme() == "https" {
                let handshake = HandshakeEvent {
                    host: url.host_str().unwrap_or_default().to_string(),
                    secured: true,
                    authorized: hop.authorized,
                    fingerprint: hop.fingerprint.map(str::to_string),
                };
                if observer.on_handshake(&handshake) == Control::Abort {
                    return Ok(Exchange::Aborted);
                }
            }

            match &hop.outcome {
                Outcome::Redirect(to) => {
                    let next = Url::parse(to).unwrap();
                    let event = RedirectEvent {
                        from: url.clone(),
                        to: next.clone(),
                        status: 302,
                    };
                    if observer.on_redirect(&event) == Control::Abort {
                        return Ok(Exchange::Aborted);
                    }
                    url = next;
                },
                Outcome::Respond(status, body) => {
                    let event = ResponseEvent {
                        url: url.clone(),
                        status: *status,
                        fingerprint: hop.fingerprint.map(str::to_string),
                    };
                    if observer.on_response(&event) == Control::Abort {
                        return Ok(Exchange::Aborted);
                    }
                    self.body_read.store(true, Ordering::SeqCst);
                    return Ok(Exchange::Completed(PinnedResponse {
                        status: StatusCode::from_u16(*status).unwrap(),
                        url,
                        headers: HeaderMap::new(),
                        body: body.as_bytes().to_vec(),
                    }));
                },
            }
        }

        Err(PinError::Https {
            message: "script ran out of hops".to_string(),
        })
    }
}

/// A client over `transport` with a fresh registry and barrier.
pub fn client_over(transport: Arc<ScriptedTransport>) -> PinnedClient {
    PinnedClient::with_parts(
        Arc::new(FingerprintRegistry::new()),
        Arc::new(InitBarrier::new()),
        transport,
    )
}
