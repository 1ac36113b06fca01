use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{CacheError, EmbeddingCache};
use crate::npy;

/// One `.npy` file per chunk under a root directory.
///
/// Entries are written to a temporary sibling and renamed into place, so an
/// interrupted run leaves either a whole file or none.
#[derive(Debug, Clone)]
pub struct FsEmbeddingCache {
    root: PathBuf,
}

impl FsEmbeddingCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scope entries under a model-specific subdirectory.
    pub fn with_model_tag(self, tag: &str) -> Self {
        Self {
            root: self.root.join(tag),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/{key}.npy`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.npy"))
    }
}

impl EmbeddingCache for FsEmbeddingCache {
    fn has(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    fn get(&self, key: &str) -> Result<Vec<f32>, CacheError> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Err(CacheError::MissingEntry {
                key: key.to_string(),
            });
        }
        Ok(npy::read_vector(&path)?)
    }

    fn put(&self, key: &str, embedding: &[f32]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        std::fs::create_dir_all(&parent).map_err(|source| CacheError::Io {
            path: parent.clone(),
            source,
        })?;
        let io_err = |source: std::io::Error| CacheError::Io {
            path: path.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(&parent).map_err(io_err)?;
        tmp.write_all(&npy::encode_f32(&[embedding.len()], embedding))
            .map_err(io_err)?;
        tmp.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    fn locate(&self, key: &str) -> String {
        self.path_for(key).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_from_nested_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsEmbeddingCache::new(dir.path().join("query_embed"));
        let key = "album/track-\u{2581}start-0";
        assert!(!cache.has(key));
        cache.put(key, &[0.5, -1.0]).unwrap();
        assert!(cache.has(key));
        assert_eq!(cache.get(key).unwrap(), vec![0.5, -1.0]);
        assert!(cache.path_for(key).starts_with(dir.path().join("query_embed").join("album")));
    }

    #[test]
    fn put_overwrites_silently() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsEmbeddingCache::new(dir.path());
        cache.put("k", &[1.0]).unwrap();
        cache.put("k", &[2.0, 3.0]).unwrap();
        assert_eq!(cache.get("k").unwrap(), vec![2.0, 3.0]);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn missing_entry_names_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsEmbeddingCache::new(dir.path());
        let err = cache.get("absent").unwrap_err();
        assert!(matches!(err, CacheError::MissingEntry { ref key } if key == "absent"));
    }

    #[test]
    fn existing_file_is_trusted_as_computed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsEmbeddingCache::new(dir.path());
        npy::write_vector(&cache.path_for("stale"), &[9.0, 9.0, 9.0]).unwrap();
        assert!(cache.has("stale"));
        assert_eq!(cache.get("stale").unwrap(), vec![9.0, 9.0, 9.0]);
    }

    #[test]
    fn model_tag_scopes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let a = FsEmbeddingCache::new(dir.path()).with_model_tag("epoch_10");
        let b = FsEmbeddingCache::new(dir.path()).with_model_tag("epoch_20");
        a.put("k", &[1.0]).unwrap();
        assert!(a.has("k"));
        assert!(!b.has("k"));
    }
}
