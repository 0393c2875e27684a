//! Local filesystem implementation of the CacheStore trait
//!
//! Each generation is one record-log file (`SWCG` format) under the base
//! directory. Writers rebuild the whole file in a temporary sibling and
//! rename it into place, so readers only ever see a complete generation.

use crate::cache_store::hash::{generation_file_name, generation_name_from_file, sha256, temp_suffix};
use crate::cache_store::{CacheError, CacheStore, seal, select};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strapre_proto::{CacheRecord, GenerationHeader, RecordReader, RecordWriter, RequestKey, StoredResponse};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Filesystem-backed implementation of CacheStore
#[derive(Clone)]
pub struct LocalCacheStore {
    base_path: PathBuf,
    // Serializes read-modify-write cycles; readers go lock-free
    write_lock: Arc<Mutex<()>>,
}

impl LocalCacheStore {
    /// Create a new local cache store
    ///
    /// The base_path will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, CacheError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        info!("Initialized LocalCacheStore at {:?}", base_path);
        Ok(Self {
            base_path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn generation_path(&self, name: &str) -> PathBuf {
        self.base_path.join(generation_file_name(name))
    }

    /// Load a generation as stored, or `None` if it was never created
    fn load_generation(&self, name: &str) -> Result<Option<Vec<CacheRecord>>, CacheError> {
        let path = self.generation_path(name);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(RecordReader::new(file).read_all()?))
    }

    /// Load a generation with every body checked against its digest
    fn read_generation(&self, name: &str) -> Result<Option<Vec<CacheRecord>>, CacheError> {
        let Some(records) = self.load_generation(name)? else {
            return Ok(None);
        };
        records.iter().try_for_each(verify)?;
        Ok(Some(records))
    }

    /// Replace a generation file atomically using a temporary file
    fn write_generation(&self, name: &str, records: &[CacheRecord]) -> Result<(), CacheError> {
        let final_path = self.generation_path(name);
        let temp_path = final_path.with_extension(format!("{}.tmp", temp_suffix()));

        let result = (|| -> Result<(), CacheError> {
            let file = fs::File::create(&temp_path)?;
            let mut writer = RecordWriter::new(BufWriter::new(file));
            writer.write_header(&GenerationHeader::new())?;
            for record in records {
                writer.write_record(record)?;
            }
            writer.flush()?;
            let file = writer
                .into_inner()
                .into_inner()
                .map_err(|e| CacheError::Io(e.into_error()))?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result?;

        debug!("Wrote {} records to {:?}", records.len(), final_path);
        Ok(())
    }

    /// Merge records into a generation, creating it if needed
    fn merge_generation(&self, name: &str, incoming: Vec<CacheRecord>) -> Result<(), CacheError> {
        let existing = self.read_generation(name)?.unwrap_or_default();
        let mut merged: BTreeMap<RequestKey, CacheRecord> =
            existing.into_iter().map(|r| (r.key.clone(), r)).collect();
        for record in incoming {
            merged.insert(record.key.clone(), record);
        }
        let records: Vec<CacheRecord> = merged.into_values().collect();
        self.write_generation(name, &records)
    }

    fn list_generations(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            match generation_name_from_file(file_name) {
                Some(name) => names.push(name),
                None if file_name.ends_with(".tmp") => {}
                None => warn!("Ignoring foreign file in cache dir: {}", file_name),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Run blocking filesystem work off the async runtime
    async fn blocking<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(LocalCacheStore) -> Result<T, CacheError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| CacheError::Storage(Box::new(e)))?
    }
}

fn verify(record: &CacheRecord) -> Result<(), CacheError> {
    let actual = sha256(&record.response.body);
    if actual != record.body_sha256 {
        return Err(CacheError::HashMismatch {
            url: record.key.url.clone(),
            expected: record.body_sha256.clone(),
            actual,
        });
    }
    Ok(())
}

#[async_trait::async_trait]
impl CacheStore for LocalCacheStore {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let name = name.to_string();
        self.blocking(move |store| {
            if store.generation_path(&name).exists() {
                return Ok(());
            }
            store.write_generation(&name, &[])
        })
        .await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.generation_path(name).exists())
    }

    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
        request_headers: &[(String, String)],
    ) -> Result<Option<StoredResponse>, CacheError> {
        if !key.is_get() {
            return Ok(None);
        }
        let name = name.to_string();
        let wanted = key.clone();
        let record = self
            .blocking(move |store| {
                let records = store.load_generation(&name)?.unwrap_or_default();
                Ok(records.into_iter().find(|r| r.key == wanted))
            })
            .await?;
        if let Some(record) = &record {
            verify(record)?;
        }
        Ok(select(record.as_ref(), key, request_headers).map(|r| r.response.clone()))
    }

    async fn put(&self, name: &str, record: CacheRecord) -> Result<(), CacheError> {
        self.put_all(name, vec![record]).await
    }

    async fn put_all(&self, name: &str, records: Vec<CacheRecord>) -> Result<(), CacheError> {
        let sealed = records
            .into_iter()
            .map(seal)
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self.write_lock.lock().await;
        let name = name.to_string();
        self.blocking(move |store| store.merge_generation(&name, sealed))
            .await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.generation_path(name)).await {
            Ok(()) => {
                info!("Deleted cache generation {}", name);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        self.blocking(|store| store.list_generations()).await
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let name = name.to_string();
        let records = self
            .blocking(move |store| store.load_generation(&name))
            .await?
            .unwrap_or_default();
        Ok(records.into_iter().map(|r| r.key).collect())
    }

    fn storage_type(&self) -> &str {
        "local"
    }
}
