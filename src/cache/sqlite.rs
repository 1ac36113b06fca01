use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;

use super::{CacheError, EmbeddingCache};

/// Embeddings stored as little-endian `f32` blobs in a single SQLite table.
pub struct SqliteEmbeddingCache {
    conn: Mutex<Connection>,
    label: String,
}

impl SqliteEmbeddingCache {
    /// Open (or create) a cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path).map_err(|source| CacheError::Sqlite {
            context: "open",
            source,
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|source| CacheError::Sqlite {
            context: "pragmas",
            source,
        })?;
        Self::with_connection(conn, path.to_string_lossy().into_owned())
    }

    /// Cache backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().map_err(|source| CacheError::Sqlite {
            context: "open",
            source,
        })?;
        Self::with_connection(conn, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, label: String) -> Result<Self, CacheError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunk_embeddings (
                chunk_key TEXT PRIMARY KEY,
                dim INTEGER NOT NULL,
                vec BLOB NOT NULL
            ) WITHOUT ROWID;",
        )
        .map_err(|source| CacheError::Sqlite {
            context: "create table",
            source,
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
            label,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl EmbeddingCache for SqliteEmbeddingCache {
    fn has(&self, key: &str) -> bool {
        let found = self
            .lock()
            .query_row(
                "SELECT 1 FROM chunk_embeddings WHERE chunk_key = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional();
        match found {
            Ok(found) => found.is_some(),
            Err(err) => {
                warn!("SQLite cache probe failed for {key}: {err}");
                false
            }
        }
    }

    fn get(&self, key: &str) -> Result<Vec<f32>, CacheError> {
        let row: Option<(i64, Vec<u8>)> = self
            .lock()
            .query_row(
                "SELECT dim, vec FROM chunk_embeddings WHERE chunk_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|source| CacheError::Sqlite {
                context: "select",
                source,
            })?;
        let Some((dim, blob)) = row else {
            return Err(CacheError::MissingEntry {
                key: key.to_string(),
            });
        };
        let values = decode_f32_le_blob(&blob).map_err(|reason| CacheError::CorruptEntry {
            key: key.to_string(),
            reason,
        })?;
        if values.len() as i64 != dim {
            return Err(CacheError::CorruptEntry {
                key: key.to_string(),
                reason: format!("stored dim {dim} but blob holds {} values", values.len()),
            });
        }
        Ok(values)
    }

    fn put(&self, key: &str, embedding: &[f32]) -> Result<(), CacheError> {
        self.lock()
            .execute(
                "INSERT INTO chunk_embeddings (chunk_key, dim, vec) VALUES (?1, ?2, ?3)
                 ON CONFLICT(chunk_key) DO UPDATE SET dim = excluded.dim, vec = excluded.vec",
                params![key, embedding.len() as i64, encode_f32_le_blob(embedding)],
            )
            .map_err(|source| CacheError::Sqlite {
                context: "upsert",
                source,
            })?;
        Ok(())
    }

    fn locate(&self, key: &str) -> String {
        format!("sqlite:{}#{key}", self.label)
    }
}

fn encode_f32_le_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len().saturating_mul(4));
    for &v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_f32_le_blob(blob: &[u8]) -> Result<Vec<f32>, String> {
    if blob.len() % 4 != 0 {
        return Err("blob length is not a multiple of 4 bytes".to_string());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
