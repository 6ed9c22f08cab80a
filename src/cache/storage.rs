//! SQLite-based durable stores with file blob support
//!
//! One database holds any number of named stores. Small bodies are kept
//! inline in SQLite; larger ones (most images) are written as blob files.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::CacheError;
use crate::network::{Request, Response};

use super::key::request_key;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

/// Bodies larger than this are stored as external blobs
const INLINE_THRESHOLD: usize = 10 * 1024; // 10KB

type Result<T> = std::result::Result<T, CacheError>;

/// Row shape shared by the lookup queries
type EntryRow = (i64, String, String, Option<Vec<u8>>, Option<String>);

/// SQLite-backed named stores with file blob support
pub struct CacheStorage {
    conn: Connection,
    blobs_dir: PathBuf,
}

impl CacheStorage {
    /// Open or create storage at the default XDG cache location
    pub fn open() -> Result<Self> {
        let cache_dir = Self::cache_dir()?;
        Self::open_at(&cache_dir)
    }

    /// Get the cache directory path (~/.cache/pomocache on Linux)
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_base = dirs::cache_dir().ok_or(CacheError::NoHome)?;
        Ok(cache_base.join("pomocache"))
    }

    /// Open storage at a specific directory
    pub fn open_at(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {}", e)))?;

        let db_path = cache_dir.join("stores.db");
        let blobs_dir = cache_dir.join("blobs");
        std::fs::create_dir_all(&blobs_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create blobs dir: {}", e)))?;

        let conn = Connection::open(&db_path)?;

        // Check schema version - nuke if mismatched
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Store schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            Self::nuke(&db_path, &blobs_dir)?;
            return Self::open_at(cache_dir);
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stores (
                name TEXT PRIMARY KEY NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                store_name TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                status_text TEXT NOT NULL,
                headers TEXT NOT NULL,
                body BLOB,
                blob_path TEXT,
                created_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (store_name, cache_key)
            );

            CREATE INDEX IF NOT EXISTS idx_entries_store ON cache_entries(store_name);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self { conn, blobs_dir })
    }

    /// Names of every store, oldest first
    pub fn store_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM stores ORDER BY created_at, rowid")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Create the store if it does not exist yet
    pub fn open_store(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO stores (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn has_store(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM stores WHERE name = ?1", [name], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Delete a store and every entry in it.
    ///
    /// Returns false when the store did not exist.
    pub fn delete_store(&self, name: &str) -> Result<bool> {
        let blob_paths = self.blob_paths_in(name)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM cache_entries WHERE store_name = ?1", [name])?;
        let deleted = tx.execute("DELETE FROM stores WHERE name = ?1", [name])?;
        tx.commit()?;

        for blob_path in blob_paths {
            self.remove_blob(&blob_path);
        }

        Ok(deleted > 0)
    }

    /// Look up a request in one store
    pub fn match_in(&self, store: &str, key: &str) -> Result<Option<Response>> {
        let row: Option<EntryRow> = self
            .conn
            .query_row(
                "SELECT status, status_text, headers, body, blob_path FROM cache_entries
                 WHERE store_name = ?1 AND cache_key = ?2",
                params![store, key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        match row {
            Some(row) => self.decode_row(store, key, row),
            None => Ok(None),
        }
    }

    /// Look up a request in every store, oldest store first
    pub fn match_any(&self, key: &str) -> Result<Option<Response>> {
        for store in self.store_names()? {
            if let Some(response) = self.match_in(&store, key)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Store a response for a request, replacing any previous entry
    pub fn put(&self, store: &str, request: &Request, response: &Response) -> Result<()> {
        let key = request_key(request);
        let now = Utc::now().timestamp();
        let headers = serde_json::to_string(&response.headers)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        self.open_store(store)?;
        self.delete(store, &key)?;

        if response.body.len() <= INLINE_THRESHOLD {
            // Store inline in SQLite
            self.conn.execute(
                "INSERT OR REPLACE INTO cache_entries
                 (store_name, cache_key, method, url, status, status_text, headers,
                  body, blob_path, created_at, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10)",
                params![
                    store,
                    key,
                    request.method.as_str(),
                    request.url.as_str(),
                    response.status,
                    response.status_text,
                    headers,
                    response.body,
                    now,
                    response.body.len()
                ],
            )?;
        } else {
            // Store as external blob
            let blob_path = self.write_blob(store, &key, &response.body)?;
            self.conn.execute(
                "INSERT OR REPLACE INTO cache_entries
                 (store_name, cache_key, method, url, status, status_text, headers,
                  body, blob_path, created_at, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, ?10)",
                params![
                    store,
                    key,
                    request.method.as_str(),
                    request.url.as_str(),
                    response.status,
                    response.status_text,
                    headers,
                    blob_path,
                    now,
                    response.body.len()
                ],
            )?;
        }
        Ok(())
    }

    /// Delete one entry from a store
    pub fn delete(&self, store: &str, key: &str) -> Result<bool> {
        let blob_path: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT blob_path FROM cache_entries WHERE store_name = ?1 AND cache_key = ?2",
                params![store, key],
                |r| r.get(0),
            )
            .optional()?;

        let deleted = self.conn.execute(
            "DELETE FROM cache_entries WHERE store_name = ?1 AND cache_key = ?2",
            params![store, key],
        )?;

        if let Some(Some(blob_path)) = blob_path {
            self.remove_blob(&blob_path);
        }

        Ok(deleted > 0)
    }

    /// URLs stored in one store, in insertion order
    pub fn keys(&self, store: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM cache_entries WHERE store_name = ?1 ORDER BY rowid")?;
        let urls = stmt
            .query_map([store], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    /// Drop every store and entry
    pub fn clear_all(&self) -> Result<ClearStats> {
        let entries: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0))?;
        let stores: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stores", [], |r| r.get(0))?;

        self.conn
            .execute_batch("DELETE FROM cache_entries; DELETE FROM stores;")?;

        // Clear blobs directory
        if self.blobs_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.blobs_dir) {
                log::warn!("Failed to clear blobs directory: {}", e);
            }
            std::fs::create_dir_all(&self.blobs_dir)
                .map_err(|e| CacheError::Io(format!("Failed to recreate blobs dir: {}", e)))?;
        }

        Ok(ClearStats {
            entries_removed: entries as usize,
            stores_removed: stores as usize,
        })
    }

    /// Per-store statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stmt = self.conn.prepare(
            "SELECT s.name, COUNT(e.cache_key), COALESCE(SUM(e.size_bytes), 0), MAX(e.created_at)
             FROM stores s LEFT JOIN cache_entries e ON e.store_name = s.name
             GROUP BY s.name
             ORDER BY s.created_at, s.rowid",
        )?;
        let stores = stmt
            .query_map([], |row| {
                let entries: i64 = row.get(1)?;
                let size: i64 = row.get(2)?;
                Ok(StoreStats {
                    name: row.get(0)?,
                    entries: entries as usize,
                    size_bytes: size as usize,
                    newest_entry: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CacheStats {
            total_entries: stores.iter().map(|s| s.entries).sum(),
            total_size_bytes: stores.iter().map(|s| s.size_bytes).sum(),
            stores,
        })
    }

    fn decode_row(&self, store: &str, key: &str, row: EntryRow) -> Result<Option<Response>> {
        let (status, status_text, headers, body, blob_path) = row;
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let body = match (body, blob_path) {
            (Some(body), None) => body,
            (None, Some(blob_path)) => {
                let full_path = self.blobs_dir.join(&blob_path);
                match std::fs::read(&full_path) {
                    Ok(data) => data,
                    Err(e) => {
                        log::warn!("Failed to read blob {}: {}", blob_path, e);
                        // Delete stale entry
                        let _ = self.conn.execute(
                            "DELETE FROM cache_entries WHERE store_name = ?1 AND cache_key = ?2",
                            params![store, key],
                        );
                        return Ok(None);
                    }
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(Response {
            status: status as u16,
            status_text,
            headers,
            body,
        }))
    }

    fn blob_paths_in(&self, store: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT blob_path FROM cache_entries WHERE store_name = ?1 AND blob_path IS NOT NULL",
        )?;
        let paths = stmt
            .query_map([store], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    /// Write a blob file, sharded by first 2 chars of its name
    fn write_blob(&self, store: &str, key: &str, data: &[u8]) -> Result<String> {
        let name = blob_name(store, key);
        let shard = &name[..2];
        let shard_dir = self.blobs_dir.join(shard);
        std::fs::create_dir_all(&shard_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create shard dir: {}", e)))?;

        let filename = format!("{}.bin", name);
        let rel_path = format!("{}/{}", shard, filename);
        let full_path = shard_dir.join(&filename);

        std::fs::write(&full_path, data)
            .map_err(|e| CacheError::Io(format!("Failed to write blob: {}", e)))?;

        Ok(rel_path)
    }

    fn remove_blob(&self, rel_path: &str) {
        let full_path = self.blobs_dir.join(rel_path);
        if let Err(e) = std::fs::remove_file(&full_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            log::warn!("Failed to remove blob {}: {}", rel_path, e);
        }
    }

    /// Nuke the storage (delete DB and all blobs)
    fn nuke(db_path: &Path, blobs_dir: &Path) -> Result<()> {
        if db_path.exists() {
            std::fs::remove_file(db_path)
                .map_err(|e| CacheError::Io(format!("Failed to remove store DB: {}", e)))?;
        }
        if blobs_dir.exists() {
            std::fs::remove_dir_all(blobs_dir)
                .map_err(|e| CacheError::Io(format!("Failed to remove blobs dir: {}", e)))?;
        }
        Ok(())
    }
}

/// Blob names are unique per (store, key) so the same URL can live in two stores
fn blob_name(store: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(store.as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Statistics about a clear operation
#[derive(Debug, Serialize)]
pub struct ClearStats {
    pub entries_removed: usize,
    pub stores_removed: usize,
}

/// Statistics about one store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub name: String,
    pub entries: usize,
    pub size_bytes: usize,
    pub newest_entry: Option<i64>,
}

/// Statistics about all stores
#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub stores: Vec<StoreStats>,
    pub total_entries: usize,
    pub total_size_bytes: usize,
}
