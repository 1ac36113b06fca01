//! Feature loading and per-chunk windowing.
//!
//! Features are `[frames, bins]` arrays at [`FRAME_RATE`](crate::config::FRAME_RATE)
//! frames per second. A chunk window is cut from its start frame, padded at
//! the tail with [`PAD_VALUE`] when the recording runs out, then mean pooled
//! along time.

use std::collections::HashMap;
use std::path::PathBuf;

use ndarray::{Array2, ArrayView2, Axis, s};

use crate::chunker::Chunk;
use crate::config::PAD_VALUE;
use crate::error::EvalError;
use crate::npy;

/// Source of the full feature sequence behind a chunk.
pub trait FeatureStore {
    fn load(&self, chunk: &Chunk) -> Result<Array2<f32>, EvalError>;
}

/// Reads the `.npy` file named by each record's `feat` field.
#[derive(Debug, Clone, Default)]
pub struct NpyFeatureStore {
    base_dir: Option<PathBuf>,
}

impl NpyFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative `feat` paths against `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

impl FeatureStore for NpyFeatureStore {
    fn load(&self, chunk: &Chunk) -> Result<Array2<f32>, EvalError> {
        let path = PathBuf::from(chunk.record.text("feat")?);
        let path = match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        };
        Ok(npy::read_matrix(&path)?)
    }
}

/// Features held in memory, keyed by recording key.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeatureStore {
    features: HashMap<String, Array2<f32>>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, recording_key: impl Into<String>, features: Array2<f32>) {
        self.features.insert(recording_key.into(), features);
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn load(&self, chunk: &Chunk) -> Result<Array2<f32>, EvalError> {
        self.features
            .get(&chunk.recording_key)
            .cloned()
            .ok_or_else(|| EvalError::Io {
                path: PathBuf::from(&chunk.recording_key),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no features registered for recording",
                ),
            })
    }
}

/// Cut `len` frames from `start`, padding past the end with [`PAD_VALUE`].
pub fn cut_window(features: ArrayView2<'_, f32>, start: usize, len: usize) -> Array2<f32> {
    let bins = features.ncols();
    let mut window = Array2::from_elem((len, bins), PAD_VALUE);
    let available = features.nrows().saturating_sub(start).min(len);
    if available > 0 {
        window
            .slice_mut(s![..available, ..])
            .assign(&features.slice(s![start..start + available, ..]));
    }
    window
}

/// Average consecutive groups of `mean_size` frames; a short tail group is
/// averaged over its own length.
pub fn mean_pool(window: ArrayView2<'_, f32>, mean_size: usize) -> Array2<f32> {
    if mean_size <= 1 {
        return window.to_owned();
    }
    let frames = window.nrows().div_ceil(mean_size);
    let mut pooled = Array2::zeros((frames, window.ncols()));
    for (idx, group) in window.axis_chunks_iter(Axis(0), mean_size).enumerate() {
        if let Some(mean) = group.mean_axis(Axis(0)) {
            pooled.row_mut(idx).assign(&mean);
        }
    }
    pooled
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn window_inside_sequence_is_a_plain_slice() {
        let features = Array2::from_shape_fn((10, 2), |(r, c)| (r * 10 + c) as f32);
        let window = cut_window(features.view(), 3, 4);
        assert_eq!(window, features.slice(s![3..7, ..]).to_owned());
    }

    #[test]
    fn window_past_end_is_padded_with_sentinel() {
        let features = array![[1.0_f32, 2.0], [3.0, 4.0]];
        let window = cut_window(features.view(), 1, 3);
        assert_eq!(window, array![[3.0, 4.0], [PAD_VALUE, PAD_VALUE], [PAD_VALUE, PAD_VALUE]]);
        let beyond = cut_window(features.view(), 5, 2);
        assert!(beyond.iter().all(|&v| v == PAD_VALUE));
    }

    #[test]
    fn mean_pool_averages_groups_and_tail() {
        let window = array![[1.0_f32], [3.0], [5.0], [7.0], [10.0]];
        let pooled = mean_pool(window.view(), 2);
        assert_eq!(pooled, array![[2.0], [6.0], [10.0]]);
        assert_eq!(mean_pool(window.view(), 1), window);
    }

    #[test]
    fn npy_store_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = array![[1.0_f32, 2.0], [3.0, 4.0]];
        npy::write_matrix(&dir.path().join("a.npy"), matrix.view()).unwrap();
        let line = r#"{"rec":"a","song_id":1,"dur_s":1.0,"feat":"a.npy"}"#;
        let recording =
            crate::manifest::Recording::from_record(crate::manifest::Record::parse(line).unwrap())
                .unwrap();
        let chunk = crate::chunker::Chunker::new(1.0, 1.0)
            .unwrap()
            .chunk(&recording)
            .unwrap()
            .remove(0);
        let store = NpyFeatureStore::with_base_dir(dir.path());
        assert_eq!(store.load(&chunk).unwrap(), matrix);
    }
}
