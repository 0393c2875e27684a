//! Resource manifest: the application shell pre-cached at install time

use crate::worker::WorkerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Shell resources cached when no manifest file is configured
pub const DEFAULT_SHELL: &[&str] = &[
    "/",
    "/manifest.json",
    "/android/android-launchericon-192-192.png",
    "/android/android-launchericon-512-512.png",
];

/// Ordered list of shell URLs, root-relative or absolute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub urls: Vec<String>,
}

impl Default for ResourceManifest {
    fn default() -> Self {
        Self {
            urls: DEFAULT_SHELL.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ResourceManifest {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Load a manifest from a JSON file of the form `{"urls": [...]}`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WorkerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Config(format!("reading manifest {}: {}", path.display(), e)))?;
        let manifest: Self = serde_json::from_str(&raw)
            .map_err(|e| WorkerError::Config(format!("parsing manifest {}: {}", path.display(), e)))?;
        info!("Loaded manifest with {} entries from {}", manifest.urls.len(), path.display());
        Ok(manifest)
    }

    /// Resolve every entry against the origin, preserving order
    ///
    /// Entries that resolve to the same URL are rejected, matching how a
    /// batch add refuses duplicate requests.
    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>, WorkerError> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(self.urls.len());
        for entry in &self.urls {
            let mut url = origin
                .join(entry)
                .map_err(|e| WorkerError::Config(format!("manifest entry {:?}: {}", entry, e)))?;
            url.set_fragment(None);
            if !seen.insert(url.clone()) {
                return Err(WorkerError::DuplicateManifestEntry(url.to_string()));
            }
            resolved.push(url);
        }
        debug!("Resolved {} manifest entries against {}", resolved.len(), origin);
        Ok(resolved)
    }
}
