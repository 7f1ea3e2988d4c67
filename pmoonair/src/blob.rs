//! Storage of uploaded track bytes.
//!
//! Uploaded audio is kept as opaque blobs keyed by track id. The SQLite
//! backend persists them next to the station document; the memory backend
//! serves tests and ephemeral stations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use crate::error::Result;

/// Bytes and MIME type of an uploaded track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl StoredBlob {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Abstract blob storage interface.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, track_id: &str) -> Result<Option<StoredBlob>>;
    async fn put(&self, track_id: &str, blob: StoredBlob) -> Result<()>;
    /// Returns `true` when something was deleted
    async fn delete(&self, track_id: &str) -> Result<bool>;
    async fn len(&self) -> Result<usize>;
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, track_id: &str) -> Result<Option<StoredBlob>> {
        Ok(self.blobs.lock().await.get(track_id).cloned())
    }

    async fn put(&self, track_id: &str, blob: StoredBlob) -> Result<()> {
        self.blobs.lock().await.insert(track_id.to_string(), blob);
        Ok(())
    }

    async fn delete(&self, track_id: &str) -> Result<bool> {
        Ok(self.blobs.lock().await.remove(track_id).is_some())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.blobs.lock().await.len())
    }
}

/// SQLite backend
pub struct SqliteBlobStore {
    conn: Arc<StdMutex<rusqlite::Connection>>,
}

impl SqliteBlobStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = rusqlite::Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS track_blobs (
                track_id TEXT PRIMARY KEY,
                mime_type TEXT NOT NULL,
                data BLOB NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    /// Opens the database configured under `onair.blobs.directory`
    pub fn from_config(config: &pmoconfig::Config) -> Result<Self> {
        use crate::config_ext::OnAirConfigExt;
        Self::new(config.get_onair_blob_db_path()?)
    }

    fn conn(&self) -> Arc<StdMutex<rusqlite::Connection>> {
        self.conn.clone()
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn get(&self, track_id: &str) -> Result<Option<StoredBlob>> {
        let conn = self.conn();
        let track_id = track_id.to_string();
        spawn_blocking(move || -> Result<Option<StoredBlob>> {
            let conn = conn.lock().unwrap();
            let mut stmt =
                conn.prepare("SELECT data, mime_type FROM track_blobs WHERE track_id = ?1")?;
            let mut rows = stmt.query([&track_id])?;
            let blob = match rows.next()? {
                Some(row) => Some(StoredBlob {
                    bytes: row.get(0)?,
                    mime_type: row.get(1)?,
                }),
                None => None,
            };
            Ok(blob)
        })
        .await?
    }

    async fn put(&self, track_id: &str, blob: StoredBlob) -> Result<()> {
        let conn = self.conn();
        let track_id = track_id.to_string();
        spawn_blocking(move || -> Result<()> {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT OR REPLACE INTO track_blobs (track_id, mime_type, data)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![track_id, blob.mime_type, blob.bytes],
            )?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn delete(&self, track_id: &str) -> Result<bool> {
        let conn = self.conn();
        let track_id = track_id.to_string();
        spawn_blocking(move || -> Result<bool> {
            let conn = conn.lock().unwrap();
            let removed = conn.execute(
                "DELETE FROM track_blobs WHERE track_id = ?1",
                rusqlite::params![track_id],
            )?;
            Ok(removed > 0)
        })
        .await?
    }

    async fn len(&self) -> Result<usize> {
        let conn = self.conn();
        let count = spawn_blocking(move || -> Result<usize> {
            let conn = conn.lock().unwrap();
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM track_blobs", [], |row| {
                row.get(0)
            })?;
            Ok(count as usize)
        })
        .await??;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn BlobStore) {
        assert_eq!(store.get("a").await.unwrap(), None);

        store
            .put("a", StoredBlob::new(vec![1, 2, 3], "audio/mpeg"))
            .await
            .unwrap();
        store
            .put("a", StoredBlob::new(vec![4, 5], "audio/ogg"))
            .await
            .unwrap();
        store
            .put("b", StoredBlob::new(vec![9], "audio/wav"))
            .await
            .unwrap();

        let a = store.get("a").await.unwrap().unwrap();
        assert_eq!(a.bytes, vec![4, 5]);
        assert_eq!(a.mime_type, "audio/ogg");
        assert_eq!(store.len().await.unwrap(), 2);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryBlobStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("blobs.db");
        {
            let store = SqliteBlobStore::new(&path).unwrap();
            exercise(&store).await;
        }
        let reopened = SqliteBlobStore::new(&path).unwrap();
        assert_eq!(reopened.get("b").await.unwrap().unwrap().bytes, vec![9]);
    }
}
