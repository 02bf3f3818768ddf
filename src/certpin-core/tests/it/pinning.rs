//! Pinned request outcomes through `PinnedClient`.

use certpin_core::PinError;

use crate::support::{client_over, Hop, ScriptedTransport, FP_A, FP_B};

#[tokio::test]
async fn test_matching_pin_returns_body() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "hello")]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let response = client.get("https://a.example.com/path").await.unwrap();

    assert_eq!(response.text(), "hello");
    assert!(transport.body_read());
    assert_eq!(client.last_url().as_deref(), Some("https://a.example.com"));
}

#[tokio::test]
async fn test_unpinned_domain_fails_before_body() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "secret")]);
    let client = client_over(transport.clone());

    let err = client.get("https://unpinned.example.org/").await.unwrap_err();

    assert!(matches!(err, PinError::DomainInvalid { ref host } if host == "unpinned.example.org"));
    assert_eq!(err.code(), Some("request.ssl.security.domain.invalid"));
    assert!(!transport.body_read());
}

#[tokio::test]
async fn test_trusted_but_mismatched_certificate_is_rejected() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_B, "forged")]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let err = client.get("https://a.example.com/").await.unwrap_err();

    assert!(matches!(err, PinError::FingerprintMismatch { .. }));
    assert_eq!(err.code(), Some("request.ssl.security.domain.fingerprint.mismatch"));
    assert!(!transport.body_read());
}

#[tokio::test]
async fn test_untrusted_handshake_is_not_authorized() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "x").unauthorized()]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let err = client.get("https://a.example.com/").await.unwrap_err();

    assert!(matches!(err, PinError::NotAuthorized { ref host } if host == "a.example.com"));
    assert!(!transport.body_read());
}

#[tokio::test]
async fn test_missing_certificate_is_a_mismatch() {
    let transport =
        ScriptedTransport::new(vec![Hop::respond(FP_A, "x").without_certificate()]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let err = client.get("https://a.example.com/").await.unwrap_err();

    assert!(matches!(err, PinError::FingerprintMismatch { .. }));
}

#[tokio::test]
async fn test_wildcard_pin_covers_subdomain() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "ok")]);
    let client = client_over(transport);
    client.registry().register("*.example.com", FP_A).unwrap();

    assert!(client.get("https://api.example.com/").await.is_ok());
}

#[tokio::test]
async fn test_pin_checked_against_final_host_after_redirect() {
    let transport = ScriptedTransport::new(vec![
        Hop::redirect(FP_A, "https://b.example.net/landing"),
        Hop::respond(FP_B, "landed"),
    ]);
    let client = client_over(transport.clone());
    // Only the final host is pinned.
    client.registry().register("b.example.net", FP_B).unwrap();

    let response = client.get("https://a.example.com/").await.unwrap();

    assert_eq!(response.text(), "landed");
    assert_eq!(client.last_url().as_deref(), Some("https://b.example.net"));
}

#[tokio::test]
async fn test_redirect_target_needs_its_own_pin() {
    let transport = ScriptedTransport::new(vec![
        Hop::redirect(FP_A, "https://b.example.net/"),
        Hop::respond(FP_A, "landed"),
    ]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let err = client.get("https://a.example.com/").await.unwrap_err();

    assert!(matches!(err, PinError::DomainInvalid { ref host } if host == "b.example.net"));
    assert!(!transport.body_read());
}

#[tokio::test]
async fn test_redirect_to_plain_http_is_rejected() {
    let transport = ScriptedTransport::new(vec![
        Hop::redirect(FP_A, "http://a.example.com/"),
        Hop::respond(FP_A, "plaintext"),
    ]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let err = client.get("https://a.example.com/").await.unwrap_err();

    assert!(matches!(err, PinError::NotAuthorized { .. }));
    assert!(!transport.body_read());
}

#[tokio::test]
async fn test_request_override_beats_registry() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_B, "ok")]);
    let client = client_over(transport);
    client.registry().register("a.example.com", FP_A).unwrap();

    let request = certpin_core::PinnedRequest::get("https://a.example.com/")
        .unwrap()
        .with_fingerprint(FP_B.to_lowercase());

    assert!(client.execute(request).await.is_ok());
}

#[tokio::test]
async fn test_plain_http_bypasses_pinning() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "open")]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();
    client.get("https://a.example.com/").await.unwrap();
    assert!(client.last_url().is_some());

    let response = client.get("http://unpinned.example.org/").await.unwrap();

    assert_eq!(response.text(), "open");
    assert_eq!(client.last_url(), None);
}

#[tokio::test]
async fn test_failed_request_does_not_affect_the_next() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_A, "ok")]);
    let client = client_over(transport);

    assert!(client.get("https://a.example.com/").await.is_err());
    client.registry().register("a.example.com", FP_A).unwrap();
    assert!(client.get("https://a.example.com/").await.is_ok());
}

#[tokio::test]
async fn test_fingerprint_for_url_prefers_registry() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_B, "")]);
    let client = client_over(transport.clone());
    client.registry().register("a.example.com", FP_A).unwrap();

    let fp = client.fingerprint_for_url("https://a.example.com/x").await.unwrap();

    assert_eq!(fp, FP_A);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_fingerprint_for_url_probes_bare_host() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_B, "unread")]);
    let client = client_over(transport.clone());

    let fp = client.fingerprint_for_url("B.Example.Net").await.unwrap();

    assert_eq!(fp, FP_B);
    assert_eq!(transport.seen_urls(), vec!["https://b.example.net/".to_string()]);
    assert!(!transport.body_read());
}

#[tokio::test]
async fn test_fingerprint_for_url_rejects_untrusted_server() {
    let transport = ScriptedTransport::new(vec![Hop::respond(FP_B, "").unauthorized()]);
    let client = client_over(transport);

    let err = client.fingerprint_for_url("b.example.net").await.unwrap_err();

    assert!(matches!(err, PinError::NotAuthorized { .. }));
}
