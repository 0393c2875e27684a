//! SQLite implementation of the CacheStore trait

use crate::cache_store::{CacheError, CacheStore, seal, select};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use strapre_proto::{CacheRecord, RequestKey, StoredResponse};
use tracing::{debug, info};

/// SQLite-backed implementation of CacheStore
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Create a new SQLite cache store
    ///
    /// If the database doesn't exist, it will be created with the required schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open(db_path)?)
    }

    /// Create a store backed by a private in-memory database
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Database("connection lock poisoned".to_string()))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.conn()?;

        // One row per cache generation
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS caches (
                name TEXT PRIMARY KEY,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        // Entries: at most one per (generation, method, url)
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                cache_name TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                vary TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                body_sha256 TEXT NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (cache_name, method, url)
            )
            "#,
            [],
        )?;

        info!("Cache store database schema initialized");
        Ok(())
    }

    fn insert_record(conn: &Connection, name: &str, record: &CacheRecord) -> Result<(), CacheError> {
        conn.execute(
            r#"
            INSERT OR REPLACE INTO entries
                (cache_name, method, url, vary, status, headers, body, body_sha256, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                name,
                record.key.method,
                record.key.url,
                serde_json::to_string(&record.vary)?,
                record.response.status,
                serde_json::to_string(&record.response.headers)?,
                record.response.body,
                record.body_sha256,
                record.stored_at,
            ],
        )?;
        Ok(())
    }

    fn ensure_cache(conn: &Connection, name: &str) -> Result<(), CacheError> {
        conn.execute("INSERT OR IGNORE INTO caches (name) VALUES (?1)", params![name])?;
        Ok(())
    }
}

/// Raw row columns, decoded outside the rusqlite closure so JSON errors keep their type
struct EntryRow {
    method: String,
    url: String,
    vary: String,
    status: u16,
    headers: String,
    body: Vec<u8>,
    body_sha256: String,
    stored_at: i64,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            method: row.get(0)?,
            url: row.get(1)?,
            vary: row.get(2)?,
            status: row.get(3)?,
            headers: row.get(4)?,
            body: row.get(5)?,
            body_sha256: row.get(6)?,
            stored_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<CacheRecord, CacheError> {
        Ok(CacheRecord {
            key: RequestKey {
                method: self.method,
                url: self.url,
            },
            vary: serde_json::from_str(&self.vary)?,
            response: StoredResponse::new(self.status, serde_json::from_str(&self.headers)?, self.body),
            body_sha256: self.body_sha256,
            stored_at: self.stored_at,
        })
    }
}

#[async_trait::async_trait]
impl CacheStore for SqliteCacheStore {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let conn = self.conn()?;
        Self::ensure_cache(&conn, name)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        let conn = self.conn()?;
        let found = conn
            .query_row("SELECT 1 FROM caches WHERE name = ?1", params![name], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
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
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT method, url, vary, status, headers, body, body_sha256, stored_at
                FROM entries
                WHERE cache_name = ?1 AND method = ?2 AND url = ?3
                "#,
                params![name, key.method, key.url],
                EntryRow::from_row,
            )
            .optional()?;

        let record = row.map(EntryRow::into_record).transpose()?;
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

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::ensure_cache(&tx, name)?;
        for record in &sealed {
            Self::insert_record(&tx, name, record)?;
        }
        tx.commit()?;

        debug!("Stored {} records in sqlite cache {}", sealed.len(), name);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE cache_name = ?1", params![name])?;
        let removed = tx.execute("DELETE FROM caches WHERE name = ?1", params![name])?;
        tx.commit()?;
        if removed > 0 {
            info!("Deleted cache generation {}", name);
        }
        Ok(removed > 0)
    }

    async fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    async fn keys(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT method, url FROM entries WHERE cache_name = ?1 ORDER BY method, url")?;
        let keys = stmt
            .query_map(params![name], |row| {
                Ok(RequestKey {
                    method: row.get(0)?,
                    url: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn storage_type(&self) -> &str {
        "sqlite"
    }
}
