//! Fingerprint registry: domain pattern → expected certificate fingerprint.
//!
//! Lookups try the exact domain first, then wildcard patterns from most to
//! least specific, so one `*.example.com` pin covers every subdomain while an
//! exact `api.example.com` pin still overrides it.
//!
//! ## Directory layout
//!
//! [`FingerprintRegistry::load_directory`] reads one pin per regular file:
//!
//! ```text
//! pins/
//! ├── www.example.com      9C:A2:2B:...:6D:A3
//! └── *.example.org        SHA1 Fingerprint=01:23:...:EF
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info, instrument};

use crate::domain::{self, AsDomain};
use crate::error::PinError;
use crate::fingerprint;

/// Shared, thread-safe store of pinned fingerprints.
#[derive(Debug, Default)]
pub struct FingerprintRegistry {
    /// Normalized pattern → normalized fingerprint.
    entries: RwLock<HashMap<String, String>>,
}

impl FingerprintRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `fingerprint` for `pattern`, replacing any existing pin.
    ///
    /// `pattern` may be a URL, a bare domain or a wildcard such as `*.example.com`.
    pub fn register<D: AsDomain + ?Sized>(
        &self,
        pattern: &D,
        fingerprint: &str,
    ) -> Result<(), PinError> {
        let name = domain::normalize(pattern);
        if name.is_empty() {
            return Err(PinError::InvalidInput {
                message: "missing name".into(),
            });
        }
        let fingerprint = fingerprint::normalize(fingerprint);
        if fingerprint.is_empty() {
            return Err(PinError::InvalidInput {
                message: "missing fingerprint".into(),
            });
        }

        debug!(pattern = %name, fingerprint = %fingerprint, "Registering fingerprint");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, fingerprint);
        Ok(())
    }

    /// Remove the pin for `pattern`. Absent patterns are ignored.
    pub fn unregister<D: AsDomain + ?Sized>(&self, pattern: &D) {
        let name = domain::normalize(pattern);
        debug!(pattern = %name, "Removing fingerprint");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name);
    }

    /// Remove every pin.
    pub fn clear(&self) {
        debug!("Removing all fingerprints");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Find the pin covering a host or URL.
    pub fn lookup<D: AsDomain + ?Sized>(&self, host_or_url: &D) -> Option<String> {
        let name = domain::normalize(host_or_url);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(found) = entries.get(&name) {
            debug!(domain = %name, "Exact fingerprint match");
            return Some(found.clone());
        }

        for pattern in domain::wildcard_candidates(&name) {
            if let Some(found) = entries.get(&pattern) {
                debug!(domain = %name, pattern = %pattern, "Wildcard fingerprint match");
                return Some(found.clone());
            }
        }

        debug!(domain = %name, "No fingerprint registered");
        None
    }

    /// Register every regular file in `dir`: file name is the pattern, trimmed contents the fingerprint.
    ///
    /// Files are loaded in file-name order and symlinks are followed. Fails
    /// fast: an unreadable file aborts the load, though pins registered
    /// before the failure are kept.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn load_directory(&self, dir: impl AsRef<Path>) -> Result<usize, PinError> {
        let dir = dir.as_ref();
        let io_err = |path: &Path, source| PinError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut paths = fs::read_dir(dir)
            .map_err(|e| io_err(dir, e))?
            .map(|entry| entry.map(|e| e.path()).map_err(|e| io_err(dir, e)))
            .collect::<Result<Vec<PathBuf>, PinError>>()?;
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let metadata = fs::metadata(&path).map_err(|e| io_err(&path, e))?;
            if !metadata.is_file() {
                debug!(path = %path.display(), "Skipping non-file entry");
                continue;
            }

            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| PinError::InvalidInput {
                    message: format!("fingerprint file name is not UTF-8: {}", path.display()),
                })?;
            let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;

            self.register(name, contents.trim())?;
            loaded += 1;
        }

        info!(count = loaded, "Loaded fingerprint directory");
        Ok(loaded)
    }

    /// Number of registered pins.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no pins are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered patterns, sorted.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        patterns.sort();
        patterns
    }
}
