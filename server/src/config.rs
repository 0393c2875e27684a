//! Host configuration read from `STRAPRE_*` environment variables

use crate::fetcher::DEFAULT_FETCH_TIMEOUT;
use crate::manifest::ResourceManifest;
use crate::worker::{FetchPolicy, WorkerError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CACHE_VERSION: &str = "Strapre-v1";
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:3000";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8724";
pub const DEFAULT_STORAGE_DIR: &str = "./strapre-storage";

/// Which cache store backend the host uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Local,
    Sqlite,
}

impl std::str::FromStr for StoreKind {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "local" => Ok(StoreKind::Local),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => Err(WorkerError::Config(format!("unknown store kind {:?}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub origin: Url,
    pub listen: SocketAddr,
    pub cache_version: String,
    pub manifest: ResourceManifest,
    pub store: StoreKind,
    pub storage_dir: PathBuf,
    pub policy: FetchPolicy,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, WorkerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let origin_raw = get("STRAPRE_ORIGIN").unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        let origin = Url::parse(&origin_raw)
            .map_err(|e| WorkerError::Config(format!("STRAPRE_ORIGIN {:?}: {}", origin_raw, e)))?;
        if origin.cannot_be_a_base() {
            return Err(WorkerError::Config(format!("STRAPRE_ORIGIN {:?} is not a base URL", origin_raw)));
        }

        let listen_raw = get("STRAPRE_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = listen_raw
            .parse::<SocketAddr>()
            .map_err(|e| WorkerError::Config(format!("STRAPRE_LISTEN {:?}: {}", listen_raw, e)))?;

        let manifest = match get("STRAPRE_MANIFEST") {
            Some(path) => ResourceManifest::load(path)?,
            None => ResourceManifest::default(),
        };

        let store = match get("STRAPRE_STORE") {
            Some(kind) => kind.parse::<StoreKind>()?,
            None => StoreKind::Sqlite,
        };

        let cache_on_miss = match get("STRAPRE_CACHE_ON_MISS") {
            Some(raw) => parse_bool("STRAPRE_CACHE_ON_MISS", &raw)?,
            None => false,
        };

        let fetch_timeout = match get("STRAPRE_FETCH_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| WorkerError::Config(format!("STRAPRE_FETCH_TIMEOUT_SECS {:?}: {}", raw, e)))?;
                if secs == 0 {
                    return Err(WorkerError::Config("STRAPRE_FETCH_TIMEOUT_SECS must be positive".to_string()));
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_FETCH_TIMEOUT,
        };

        Ok(Self {
            origin,
            listen,
            cache_version: get("STRAPRE_CACHE_VERSION").unwrap_or_else(|| DEFAULT_CACHE_VERSION.to_string()),
            manifest,
            store,
            storage_dir: get("STRAPRE_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            policy: FetchPolicy {
                cache_on_miss,
                fetch_timeout,
            },
        })
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, WorkerError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(WorkerError::Config(format!("{} {:?} is not a boolean", key, raw))),
    }
}
