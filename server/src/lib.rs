pub mod cache_store;
pub mod config;
pub mod fetcher;
pub mod manifest;
pub mod registration;
pub mod server;
pub mod worker;

// Re-export commonly used types
pub use cache_store::{CacheError, CacheStore};
pub use fetcher::{FetchError, FetchRequest, Fetcher};
pub use registration::{Registration, RegistrationStatus};
pub use worker::{FetchPolicy, ShellWorker, WorkerError};

use url::Url;

/// Largest request body the host will buffer before handing it to the worker
pub const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

pub type AppState = std::sync::Arc<HostState>;

pub struct HostState {
    pub registration: Registration,
    // Incoming paths are resolved against this origin
    pub origin: Url,
}

impl HostState {
    pub fn new(registration: Registration, origin: Url) -> Self {
        Self {
            registration,
            origin,
        }
    }
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("scope", &self.registration.scope())
            .field("origin", &self.origin.as_str())
            .finish()
    }
}
