//! SHA-1 certificate fingerprints in `XX:XX:...:XX` form.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Number of byte groups in a SHA-1 fingerprint.
pub const FINGERPRINT_GROUPS: usize = 20;

/// Prefix emitted by `openssl x509 -fingerprint -sha1`.
const OPENSSL_PREFIX: &str = "SHA1 Fingerprint=";

/// Normalize a stored fingerprint.
///
/// Strips surrounding whitespace and an optional `SHA1 Fingerprint=` prefix,
/// then uppercases. Malformed input is kept as-is otherwise; it simply never
/// matches at verification time.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    // Newer OpenSSL releases print the prefix as "sha1 Fingerprint=".
    let value = match trimmed.get(..OPENSSL_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(OPENSSL_PREFIX) => &trimmed[OPENSSL_PREFIX.len()..],
        _ => trimmed,
    };
    value.trim().to_ascii_uppercase()
}

/// Check that a fingerprint is exactly 20 colon-separated two-digit hex groups.
pub fn is_well_formed(fingerprint: &str) -> bool {
    let mut groups = 0;
    for group in fingerprint.split(':') {
        if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
            return false;
        }
        groups += 1;
    }
    groups == FINGERPRINT_GROUPS
}

/// Render the SHA-1 fingerprint of a DER-encoded certificate.
pub fn from_der(der: &[u8]) -> String {
    let digest = Sha1::digest(der);
    digest
        .iter()
        .map(|byte| hex::encode_upper([*byte]))
        .collect::<Vec<_>>()
        .join(":")
}

/// Compare two normalized fingerprints without early exit.
pub fn matches(expected: &str, actual: &str) -> bool {
    expected.as_bytes().ct_eq(actual.as_bytes()).into()
}
