//! The shell worker: install, activate, and cache-first fetch resolution
//!
//! Lifecycle hooks take everything they touch as explicit dependencies, so
//! the policy runs the same against an in-memory store and a fake network as
//! it does inside the HTTP host.

use crate::cache_store::{CacheError, CacheStore};
use crate::fetcher::{DEFAULT_FETCH_TIMEOUT, FetchError, FetchRequest, Fetcher};
use crate::manifest::ResourceManifest;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use strapre_proto::{CacheRecord, RequestKey, StoredResponse};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// Error type for worker lifecycle operations
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Manifest fetch of {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Duplicate manifest entry: {0}")]
    DuplicateManifestEntry(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// How the fetch path behaves on a cache miss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPolicy {
    /// Store successful GET responses fetched on a miss
    pub cache_on_miss: bool,
    /// Deadline for every network fetch the worker makes
    pub fetch_timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            cache_on_miss: false,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// One deployed version of the interception logic
pub struct ShellWorker {
    version: String,
    origin: Url,
    manifest: ResourceManifest,
    policy: FetchPolicy,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for ShellWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellWorker")
            .field("version", &self.version)
            .field("origin", &self.origin.as_str())
            .field("manifest", &self.manifest)
            .field("policy", &self.policy)
            .field("store", &self.store.storage_type())
            .field("fetcher", &"<dyn Fetcher>")
            .finish()
    }
}

impl ShellWorker {
    pub fn new(
        version: impl Into<String>,
        origin: Url,
        manifest: ResourceManifest,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            version: version.into(),
            origin,
            manifest,
            policy: FetchPolicy::default(),
            store,
            fetcher,
        }
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The cache generation name this worker owns
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Populate this version's generation with the whole manifest
    ///
    /// Either every manifest resource is stored or the install fails and
    /// nothing from this attempt is written. A generation created by a failed
    /// install is removed again.
    pub async fn on_install(&self) -> Result<usize, WorkerError> {
        info!("Installing worker version {}", self.version);
        let urls = self.manifest.resolve(&self.origin)?;

        let existed = self.store.has(&self.version).await?;
        self.store.open(&self.version).await?;

        match add_all(
            self.store.as_ref(),
            self.fetcher.as_ref(),
            &self.version,
            &urls,
            self.policy.fetch_timeout,
        )
        .await
        {
            Ok(count) => {
                info!("Installed {} with {} shell resources", self.version, count);
                Ok(count)
            }
            Err(e) => {
                error!("Install of {} failed: {}", self.version, e);
                if !existed {
                    if let Err(cleanup) = self.store.delete(&self.version).await {
                        warn!("Failed to remove empty generation {}: {}", self.version, cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    /// Whether this version's generation already holds every manifest resource
    pub async fn is_installed(&self) -> Result<bool, WorkerError> {
        if !self.store.has(&self.version).await? {
            return Ok(false);
        }
        let stored: BTreeSet<RequestKey> = self.store.keys(&self.version).await?.into_iter().collect();
        let urls = self.manifest.resolve(&self.origin)?;
        Ok(urls.iter().all(|url| stored.contains(&RequestKey::get(url))))
    }

    /// Delete every cache generation except this version's and those in `keep`
    ///
    /// Returns the names that were removed.
    pub async fn on_activate(&self, keep: &[String]) -> Result<Vec<String>, WorkerError> {
        let mut deleted = Vec::new();
        for name in self.store.cache_names().await? {
            if name == self.version || keep.contains(&name) {
                continue;
            }
            if self.store.delete(&name).await? {
                info!("Purged superseded cache generation {}", name);
                deleted.push(name);
            }
        }
        info!("Activated worker version {}", self.version);
        Ok(deleted)
    }

    /// Answer a fetch event
    pub async fn on_fetch(&self, request: &FetchRequest) -> Result<StoredResponse, FetchError> {
        resolve(
            request,
            &self.version,
            self.store.as_ref(),
            self.fetcher.as_ref(),
            self.policy,
        )
        .await
    }
}

/// Fetch with a deadline on top of whatever the fetcher does itself
pub async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    request: &FetchRequest,
    timeout: Duration,
) -> Result<StoredResponse, FetchError> {
    match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Fetch of {} timed out after {:?}", request.url, timeout);
            Err(FetchError::Timeout(timeout))
        }
    }
}

/// Fetch every URL and store the responses as one atomic batch
///
/// Any transport failure or non-2xx status rejects the whole batch before
/// anything is written.
pub async fn add_all(
    store: &dyn CacheStore,
    fetcher: &dyn Fetcher,
    cache_name: &str,
    urls: &[Url],
    timeout: Duration,
) -> Result<usize, WorkerError> {
    let requests: Vec<FetchRequest> = urls.iter().cloned().map(FetchRequest::get).collect();

    let records = try_join_all(
        requests
            .iter()
            .map(|request| fetch_shell_resource(fetcher, request, timeout)),
    )
    .await?;

    let count = records.len();
    store.put_all(cache_name, records).await?;
    Ok(count)
}

async fn fetch_shell_resource(
    fetcher: &dyn Fetcher,
    request: &FetchRequest,
    timeout: Duration,
) -> Result<CacheRecord, WorkerError> {
    let response = fetch_with_timeout(fetcher, request, timeout).await?;
    if !response.is_ok() {
        return Err(WorkerError::BadStatus {
            url: request.url.to_string(),
            status: response.status,
        });
    }
    debug!("Fetched shell resource {} ({} bytes)", request.url, response.body.len());
    Ok(CacheRecord::new(request.key(), &request.headers, response))
}

/// Cache-first resolution against one generation, falling back to the network
///
/// A lookup failure counts as a miss. Network results, including error
/// statuses, are returned unmodified; transport errors propagate as-is.
pub async fn resolve(
    request: &FetchRequest,
    cache_name: &str,
    store: &dyn CacheStore,
    fetcher: &dyn Fetcher,
    policy: FetchPolicy,
) -> Result<StoredResponse, FetchError> {
    let key = request.key();

    match store.match_request(cache_name, &key, &request.headers).await {
        Ok(Some(response)) => {
            debug!("Cache hit in {}: {} {}", cache_name, key.method, key.url);
            return Ok(response);
        }
        Ok(None) => debug!("Cache miss in {}: {} {}", cache_name, key.method, key.url),
        Err(e) => warn!("Cache lookup in {} failed, going to network: {}", cache_name, e),
    }

    let response = fetch_with_timeout(fetcher, request, policy.fetch_timeout).await?;

    if policy.cache_on_miss && key.is_get() && response.is_ok() {
        let record = CacheRecord::new(key, &request.headers, response.clone());
        if let Err(e) = store.put(cache_name, record).await {
            warn!("Failed to cache {} on miss: {}", request.url, e);
        }
    }

    Ok(response)
}
