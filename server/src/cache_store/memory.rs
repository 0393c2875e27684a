//! In-memory implementation of the CacheStore trait

use crate::cache_store::{CacheError, CacheStore, seal, select};
use std::collections::{BTreeMap, HashMap};
use strapre_proto::{CacheRecord, RequestKey, StoredResponse};
use tokio::sync::RwLock;
use tracing::debug;

type Generation = BTreeMap<RequestKey, CacheRecord>;

/// Process-local cache store; contents are lost on restart
#[derive(Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Generation>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
        request_headers: &[(String, String)],
    ) -> Result<Option<StoredResponse>, CacheError> {
        let caches = self.caches.read().await;
        let record = caches.get(name).and_then(|generation| generation.get(key));
        Ok(select(record, key, request_headers).map(|r| r.response.clone()))
    }

    async fn put(&self, name: &str, record: CacheRecord) -> Result<(), CacheError> {
        let record = seal(record)?;
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(record.key.clone(), record);
        Ok(())
    }

    async fn put_all(&self, name: &str, records: Vec<CacheRecord>) -> Result<(), CacheError> {
        // Validate everything before taking the lock so a bad record writes nothing
        let sealed = records
            .into_iter()
            .map(seal)
            .collect::<Result<Vec<_>, _>>()?;
        let count = sealed.len();

        let mut caches = self.caches.write().await;
        let generation = caches.entry(name.to_string()).or_default();
        for record in sealed {
            generation.insert(record.key.clone(), record);
        }

        debug!("Stored {} records in memory cache {}", count, name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .map(|generation| generation.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn storage_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn record(path: &str, body: &[u8]) -> CacheRecord {
        let url = Url::parse("https://strapre.example").unwrap().join(path).unwrap();
        CacheRecord::new(RequestKey::get(&url), &[], StoredResponse::new(200, vec![], body.to_vec()))
    }

    #[tokio::test]
    async fn test_put_overwrites_same_identity() {
        let store = MemoryCacheStore::new();
        store.put("v1", record("/", b"old")).await.unwrap();
        store.put("v1", record("/", b"new")).await.unwrap();

        let key = record("/", b"").key;
        assert_eq!(store.keys("v1").await.unwrap().len(), 1);
        let hit = store.match_request("v1", &key, &[]).await.unwrap().unwrap();
        assert_eq!(hit.body, b"new");
    }

    #[tokio::test]
    async fn test_put_all_rejects_whole_batch() {
        let store = MemoryCacheStore::new();
        let mut bad = record("/api", b"x");
        bad.key.method = "POST".to_string();

        let result = store.put_all("v1", vec![record("/", b"shell"), bad]).await;
        assert!(result.is_err());
        assert!(store.keys("v1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_generation_is_a_miss() {
        let store = MemoryCacheStore::new();
        let key = record("/", b"").key;
        assert!(store.match_request("nope", &key, &[]).await.unwrap().is_none());
        assert!(!store.has("nope").await.unwrap());
        assert!(!store.delete("nope").await.unwrap());
    }
}
