//! Loading pins from disk and using them for requests.

use std::fs;

use certpin_core::{PinConfig, PinError, PinnedClient};
use tempfile::TempDir;

use crate::support::{client_over, Hop, ScriptedTransport, FP_A, FP_B};

#[tokio::test]
async fn test_directory_pins_drive_requests() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.example.com"), format!("SHA1 Fingerprint={}\n", FP_A)).unwrap();
    fs::write(dir.path().join("*.example.net"), FP_B).unwrap();

    let transport = ScriptedTransport::new(vec![Hop::respond(FP_B, "ok")]);
    let client = client_over(transport);
    assert_eq!(client.registry().load_directory(dir.path()).unwrap(), 2);

    assert_eq!(client.registry().lookup("a.example.com").as_deref(), Some(FP_A));
    assert!(client.get("https://cdn.example.net/").await.is_ok());
}

#[test]
fn test_client_loads_configured_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.example.com"), FP_A).unwrap();

    let config = PinConfig {
        fingerprint_dir: Some(dir.path().to_path_buf()),
        ..PinConfig::default()
    };
    let client = PinnedClient::new(config).unwrap();

    assert_eq!(client.registry().len(), 1);
}

#[test]
fn test_client_reports_missing_directory() {
    let dir = TempDir::new().unwrap();
    let config = PinConfig {
        fingerprint_dir: Some(dir.path().join("missing")),
        ..PinConfig::default()
    };

    assert!(matches!(PinnedClient::new(config), Err(PinError::Io { .. })));
}
