use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{CacheError, EmbeddingCache};

/// In-process cache, mostly for tests and one-shot evaluations.
#[derive(Debug, Default)]
pub struct MemoryEmbeddingCache {
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

impl MemoryEmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<f32>>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop an entry so the next run recomputes it.
    pub fn evict(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }
}

impl EmbeddingCache for MemoryEmbeddingCache {
    fn has(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn get(&self, key: &str) -> Result<Vec<f32>, CacheError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::MissingEntry {
                key: key.to_string(),
            })
    }

    fn put(&self, key: &str, embedding: &[f32]) -> Result<(), CacheError> {
        self.lock().insert(key.to_string(), embedding.to_vec());
        Ok(())
    }

    fn locate(&self, key: &str) -> String {
        format!("memory:{key}")
    }
}
