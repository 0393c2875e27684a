//! Versioned cache storage for the shell worker
//!
//! A cache store holds named cache generations, each mapping a request
//! identity to one stored response. The worker only ever talks to the
//! [`CacheStore`] trait so backends can be swapped (memory for tests,
//! a record-log directory, or SQLite).

pub mod hash;
pub mod local;
pub mod memory;
pub mod sqlite;

use strapre_proto::{CacheRecord, RequestKey, StoredResponse};
use thiserror::Error;

/// Error type for cache store operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Codec(e.to_string())
    }
}

/// Trait for the persistent, host-managed request/response store
///
/// Every operation is atomic per key; `put_all` is atomic for the whole
/// batch: either every record lands or none does.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a cache generation, creating it empty if it does not exist
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Check whether a cache generation exists
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Look up a request in one generation
    ///
    /// Non-GET requests never match. A missing generation is a miss, not an error.
    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
        request_headers: &[(String, String)],
    ) -> Result<Option<StoredResponse>, CacheError>;

    /// Store one record, replacing any entry with the same identity
    async fn put(&self, name: &str, record: CacheRecord) -> Result<(), CacheError>;

    /// Store a batch of records atomically
    async fn put_all(&self, name: &str, records: Vec<CacheRecord>) -> Result<(), CacheError>;

    /// Delete a whole generation. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of every stored generation, sorted
    async fn cache_names(&self) -> Result<Vec<String>, CacheError>;

    /// Request identities stored in one generation, sorted
    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError>;

    /// Get the storage type identifier (e.g., "memory", "local", "sqlite")
    fn storage_type(&self) -> &str;
}

/// Validate a record before it is written and stamp its body digest
pub(crate) fn seal(mut record: CacheRecord) -> Result<CacheRecord, CacheError> {
    if !record.key.is_get() {
        return Err(CacheError::UnsupportedMethod(record.key.method));
    }
    record.body_sha256 = hash::sha256(&record.response.body);
    Ok(record)
}

/// Pick the record answering a request, if any
pub(crate) fn select<'a>(
    record: Option<&'a CacheRecord>,
    key: &RequestKey,
    request_headers: &[(String, String)],
) -> Option<&'a CacheRecord> {
    if !key.is_get() {
        return None;
    }
    record.filter(|r| r.vary_matches(request_headers))
}
