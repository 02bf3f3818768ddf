//! Domain extraction and wildcard derivation.
//!
//! Every registry key and every lookup goes through [`normalize`], so a bare
//! hostname, a full URL string and a parsed [`Url`] all land on the same key.

use url::Url;

/// Anything a comparable domain can be extracted from.
pub trait AsDomain {
    /// Extract the normalized domain.
    fn to_domain(&self) -> String;
}

impl AsDomain for str {
    fn to_domain(&self) -> String {
        let raw = self.trim();
        match Url::parse(raw) {
            Ok(url) => host_of(&url).unwrap_or_else(|| raw.to_ascii_lowercase()),
            // Bare domains ("www.example.com") have no scheme and fail to parse.
            Err(_) => raw.to_ascii_lowercase(),
        }
    }
}

impl AsDomain for String {
    fn to_domain(&self) -> String {
        self.as_str().to_domain()
    }
}

impl AsDomain for Url {
    fn to_domain(&self) -> String {
        host_of(self).unwrap_or_else(|| self.as_str().to_ascii_lowercase())
    }
}

/// Normalize a URL, URL string or bare hostname to a domain.
pub fn normalize<D: AsDomain + ?Sized>(input: &D) -> String {
    input.to_domain()
}

/// Host component of a URL, with an explicit non-default port appended.
pub fn host_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// Wildcard patterns that may cover `domain`, most specific first.
///
/// `a.b.example.com` yields `*.b.example.com`, `*.example.com`, `*.com`.
/// A single-label domain `intranet` yields only `*.intranet`.
pub fn wildcard_candidates(domain: &str) -> Vec<String> {
    if domain.is_empty() {
        return Vec::new();
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() == 1 {
        return vec![format!("*.{domain}")];
    }

    (1..labels.len())
        .map(|skip| format!("*.{}", labels[skip..].join(".")))
        .collect()
}
