//! Chunk embedding cache.
//!
//! Entries are keyed by chunk key. Presence of an entry is the only
//! "already computed" signal: nothing records which model produced a vector,
//! so a cache filled by one model is silently reused by another. Scope cache
//! directories per model (see [`FsEmbeddingCache::with_model_tag`]) when that
//! matters. Writes are last-writer-wins with no locking; two runs writing the
//! same key race, distinct keys never collide.

mod fs;
mod memory;
mod sqlite;

use std::path::PathBuf;

use thiserror::Error;

use crate::npy::NpyError;

pub use fs::FsEmbeddingCache;
pub use memory::MemoryEmbeddingCache;
pub use sqlite::SqliteEmbeddingCache;

#[derive(Debug, Error)]
pub enum CacheError {
    /// `get` was called for a key with no entry.
    #[error("No cached embedding for chunk {key}")]
    MissingEntry { key: String },
    #[error("Cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Npy(#[from] NpyError),
    #[error("SQLite cache error ({context}): {source}")]
    Sqlite {
        context: &'static str,
        source: rusqlite::Error,
    },
    #[error("Corrupt SQLite entry for chunk {key}: {reason}")]
    CorruptEntry { key: String, reason: String },
}

/// Key-value store of chunk embeddings.
///
/// `has` returning true means `get` is trusted to return a valid vector; no
/// checksum or shape check happens on the way out.
pub trait EmbeddingCache: Send + Sync {
    fn has(&self, key: &str) -> bool;

    /// Load an entry, failing with [`CacheError::MissingEntry`] when absent.
    fn get(&self, key: &str) -> Result<Vec<f32>, CacheError>;

    /// Store an entry, replacing any previous value.
    fn put(&self, key: &str, embedding: &[f32]) -> Result<(), CacheError>;

    /// Human-readable location of an entry, recorded in chunk manifests.
    fn locate(&self, key: &str) -> String;
}

impl<C: EmbeddingCache + ?Sized> EmbeddingCache for &C {
    fn has(&self, key: &str) -> bool {
        (**self).has(key)
    }

    fn get(&self, key: &str) -> Result<Vec<f32>, CacheError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, embedding: &[f32]) -> Result<(), CacheError> {
        (**self).put(key, embedding)
    }

    fn locate(&self, key: &str) -> String {
        (**self).locate(key)
    }
}
