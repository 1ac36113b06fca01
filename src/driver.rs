//! Batched embedding of chunks that have no cache entry yet.

use std::collections::HashMap;
use std::path::PathBuf;

use ndarray::{Array2, Array3, s};
use tracing::{debug, info};

use crate::cache::EmbeddingCache;
use crate::chunker::Chunk;
use crate::error::EvalError;
use crate::features::{FeatureStore, cut_window, mean_pool};
use crate::manifest::Label;
use crate::model::EmbeddingModel;
use crate::npy;

/// All chunk embeddings of one recording, in chunk order.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecording {
    pub key: String,
    pub label: Label,
    pub chunks: Vec<Vec<f32>>,
}

/// Recordings with their chunk embeddings, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedCorpus {
    recordings: Vec<EmbeddedRecording>,
    index: HashMap<String, usize>,
}

impl EmbeddedCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk embedding to its recording.
    ///
    /// A recording key seen again with another label is a fatal conflict.
    pub fn push(
        &mut self,
        recording_key: &str,
        label: &Label,
        embedding: Vec<f32>,
    ) -> Result<(), EvalError> {
        match self.index.get(recording_key) {
            Some(&idx) => {
                let recording = &mut self.recordings[idx];
                if &recording.label != label {
                    return Err(EvalError::LabelConflict {
                        key: recording_key.to_string(),
                        first: recording.label.to_string(),
                        second: label.to_string(),
                    });
                }
                recording.chunks.push(embedding);
            }
            None => {
                self.index
                    .insert(recording_key.to_string(), self.recordings.len());
                self.recordings.push(EmbeddedRecording {
                    key: recording_key.to_string(),
                    label: label.clone(),
                    chunks: vec![embedding],
                });
            }
        }
        Ok(())
    }

    /// Load every chunk's embedding from `cache`, grouping by recording.
    pub fn from_cache(chunks: &[Chunk], cache: &impl EmbeddingCache) -> Result<Self, EvalError> {
        Self::assemble(chunks, &HashMap::new(), cache)
    }

    /// Group `chunks` by recording, taking vectors from `fresh` first and
    /// reading only the rest from `cache`.
    pub fn assemble(
        chunks: &[Chunk],
        fresh: &HashMap<String, Vec<f32>>,
        cache: &impl EmbeddingCache,
    ) -> Result<Self, EvalError> {
        let mut corpus = Self::new();
        for chunk in chunks {
            let embedding = match fresh.get(&chunk.key) {
                Some(embedding) => embedding.clone(),
                None => cache.get(&chunk.key)?,
            };
            corpus.push(&chunk.recording_key, &chunk.label, embedding)?;
        }
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    pub fn recordings(&self) -> &[EmbeddedRecording] {
        &self.recordings
    }

    pub fn get(&self, recording_key: &str) -> Option<&EmbeddedRecording> {
        self.index
            .get(recording_key)
            .map(|&idx| &self.recordings[idx])
    }

    pub fn labels(&self) -> Vec<Label> {
        self.recordings
            .iter()
            .map(|recording| recording.label.clone())
            .collect()
    }

    /// Total number of chunk embeddings.
    pub fn chunk_count(&self) -> usize {
        self.recordings
            .iter()
            .map(|recording| recording.chunks.len())
            .sum()
    }
}

/// Window geometry and batching for a driver run.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub batch_size: usize,
    /// Raw frames per chunk window before pooling.
    pub infer_frames: usize,
    pub mean_size: usize,
    /// Extra directory that receives a `.npy` copy of every new embedding.
    pub mirror_dir: Option<PathBuf>,
}

/// Runs chunks through the model and writes results through the cache.
pub struct EmbeddingDriver<'a, M: ?Sized, F: ?Sized, C: ?Sized> {
    model: &'a mut M,
    features: &'a F,
    cache: &'a C,
    options: DriverOptions,
}

impl<'a, M, F, C> EmbeddingDriver<'a, M, F, C>
where
    M: EmbeddingModel + ?Sized,
    F: FeatureStore + ?Sized,
    C: EmbeddingCache + ?Sized,
{
    pub fn new(model: &'a mut M, features: &'a F, cache: &'a C, options: DriverOptions) -> Self {
        Self {
            model,
            features,
            cache,
            options,
        }
    }

    /// Chunks that have no cache entry.
    pub fn pending<'c>(&self, chunks: &'c [Chunk]) -> Vec<&'c Chunk> {
        chunks
            .iter()
            .filter(|chunk| !self.cache.has(&chunk.key))
            .collect()
    }

    /// Embed `chunks`, store every vector, and return them grouped by recording.
    pub fn run(&mut self, chunks: &[&Chunk]) -> Result<EmbeddedCorpus, EvalError> {
        let mut corpus = EmbeddedCorpus::new();
        self.embed_each(chunks, |chunk, embedding| {
            corpus.push(&chunk.recording_key, &chunk.label, embedding)
        })?;
        if !chunks.is_empty() {
            info!(
                "Computed {} chunk embeddings for {} recordings",
                chunks.len(),
                corpus.len()
            );
        }
        Ok(corpus)
    }

    /// Embed `chunks`, store every vector, and return them by chunk key.
    pub fn run_keyed(&mut self, chunks: &[&Chunk]) -> Result<HashMap<String, Vec<f32>>, EvalError> {
        let mut computed = HashMap::with_capacity(chunks.len());
        self.embed_each(chunks, |chunk, embedding| {
            computed.insert(chunk.key.clone(), embedding);
            Ok(())
        })?;
        if !chunks.is_empty() {
            info!("Computed {} chunk embeddings", computed.len());
        }
        Ok(computed)
    }

    fn embed_each<S>(&mut self, chunks: &[&Chunk], mut sink: S) -> Result<(), EvalError>
    where
        S: FnMut(&Chunk, Vec<f32>) -> Result<(), EvalError>,
    {
        if chunks.is_empty() {
            return Ok(());
        }
        let batch_size = self.options.batch_size.max(1);
        let total_batches = chunks.len().div_ceil(batch_size);
        let mut loaded: Option<(String, Array2<f32>)> = None;

        for (batch_idx, batch) in chunks.chunks(batch_size).enumerate() {
            let input = self.build_batch(batch, &mut loaded)?;
            let inference = self.model.inference(input.view())?;
            let embeddings = inference.embeddings;
            if embeddings.nrows() != batch.len() {
                return Err(EvalError::BatchShape {
                    expected: batch.len(),
                    actual: embeddings.nrows(),
                });
            }
            let expected = self.model.embed_length();
            for (chunk, row) in batch.iter().zip(embeddings.rows()) {
                if row.len() != expected {
                    return Err(EvalError::EmbeddingShape {
                        key: chunk.key.clone(),
                        expected,
                        actual: row.len(),
                    });
                }
                let embedding = row.to_vec();
                self.cache.put(&chunk.key, &embedding)?;
                self.mirror(&chunk.key, &embedding)?;
                sink(*chunk, embedding)?;
            }
            debug!(
                "Embedded batch {}/{} ({} chunks)",
                batch_idx + 1,
                total_batches,
                batch.len()
            );
        }
        Ok(())
    }

    fn build_batch(
        &self,
        batch: &[&Chunk],
        loaded: &mut Option<(String, Array2<f32>)>,
    ) -> Result<Array3<f32>, EvalError> {
        let mut input: Option<Array3<f32>> = None;
        for (idx, chunk) in batch.iter().enumerate() {
            let reuse = matches!(loaded, Some((key, _)) if *key == chunk.recording_key);
            if !reuse {
                *loaded = Some((chunk.recording_key.clone(), self.features.load(chunk)?));
            }
            let Some((_, features)) = loaded.as_ref() else {
                continue;
            };
            let window = cut_window(features.view(), chunk.start_frame, self.options.infer_frames);
            let pooled = mean_pool(window.view(), self.options.mean_size);
            let input = input.get_or_insert_with(|| {
                Array3::zeros((batch.len(), pooled.nrows(), pooled.ncols()))
            });
            let expected = (input.shape()[1], input.shape()[2]);
            if pooled.dim() != expected {
                return Err(EvalError::FeatureShape {
                    key: chunk.key.clone(),
                    expected,
                    actual: pooled.dim(),
                });
            }
            input.slice_mut(s![idx, .., ..]).assign(&pooled);
        }
        Ok(input.unwrap_or_else(|| Array3::zeros((0, 0, 0))))
    }

    fn mirror(&self, key: &str, embedding: &[f32]) -> Result<(), EvalError> {
        let Some(dir) = &self.options.mirror_dir else {
            return Ok(());
        };
        let path = dir.join(format!("{key}.npy"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| EvalError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        npy::write_vector(&path, embedding)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryEmbeddingCache;
    use crate::chunker::Chunker;
    use crate::features::MemoryFeatureStore;
    use crate::manifest::{Record, Recording};
    use crate::model::{Inference, ModelError};
    use ndarray::ArrayView3;

    /// Embeds each chunk as `[mean of its first frame, 1.0, ...]`.
    struct FirstFrameModel {
        embed_length: usize,
        output_length: usize,
        calls: usize,
        seen_shapes: Vec<(usize, usize, usize)>,
    }

    impl FirstFrameModel {
        fn new(embed_length: usize) -> Self {
            Self {
                embed_length,
                output_length: embed_length,
                calls: 0,
                seen_shapes: Vec::new(),
            }
        }
    }

    impl EmbeddingModel for FirstFrameModel {
        fn embed_length(&self) -> usize {
            self.embed_length
        }

        fn inference(&mut self, batch: ArrayView3<'_, f32>) -> Result<Inference, ModelError> {
            self.calls += 1;
            self.seen_shapes.push(batch.dim());
            let rows = batch.shape()[0];
            let mut embeddings = Array2::ones((rows, self.output_length));
            for row in 0..rows {
                let first = batch.slice(s![row, 0, ..]);
                embeddings[[row, 0]] = first.mean().unwrap_or(0.0);
            }
            Ok(Inference {
                embeddings,
                auxiliary: None,
            })
        }
    }

    fn recording(key: &str, song: &str, duration_s: f64) -> Recording {
        let line = serde_json::json!({"rec": key, "song_id": song, "dur_s": duration_s}).to_string();
        Recording::from_record(Record::parse(&line).unwrap()).unwrap()
    }

    fn setup() -> (Vec<Chunk>, MemoryFeatureStore) {
        let chunker = Chunker::new(2.0, 2.0).unwrap();
        let recordings = vec![recording("a", "1", 5.0), recording("b", "2", 1.0)];
        let chunks = chunker.chunk_all(&recordings).unwrap();
        let mut store = MemoryFeatureStore::new();
        store.insert("a", Array2::from_shape_fn((125, 3), |(r, _)| r as f32));
        store.insert("b", Array2::from_elem((25, 3), 7.0));
        (chunks, store)
    }

    fn options(batch_size: usize) -> DriverOptions {
        DriverOptions {
            batch_size,
            infer_frames: 50,
            mean_size: 2,
            mirror_dir: None,
        }
    }

    #[test]
    fn run_groups_chunks_by_recording_and_fills_cache() {
        let (chunks, store) = setup();
        let cache = MemoryEmbeddingCache::new();
        let mut model = FirstFrameModel::new(4);
        let mut driver = EmbeddingDriver::new(&mut model, &store, &cache, options(2));
        let pending = driver.pending(&chunks);
        assert_eq!(pending.len(), 4);
        let corpus = driver.run(&pending).unwrap();

        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.get("a").unwrap().chunks.len(), 3);
        assert_eq!(corpus.get("b").unwrap().chunks.len(), 1);
        assert_eq!(cache.len(), 4);
        assert_eq!(model.calls, 2);
        assert_eq!(model.seen_shapes[0], (2, 25, 3));

        // Second window of "a" starts at frame 50; pooled first frame = mean(50, 51).
        let second = &corpus.get("a").unwrap().chunks[1];
        assert_eq!(second[0], 50.5);
    }

    #[test]
    fn warm_cache_leaves_nothing_pending() {
        let (chunks, store) = setup();
        let cache = MemoryEmbeddingCache::new();
        let mut model = FirstFrameModel::new(4);
        {
            let mut driver = EmbeddingDriver::new(&mut model, &store, &cache, options(8));
            let pending = driver.pending(&chunks);
            driver.run(&pending).unwrap();
        }
        let mut driver = EmbeddingDriver::new(&mut model, &store, &cache, options(8));
        let pending = driver.pending(&chunks);
        assert!(pending.is_empty());
        assert!(driver.run(&pending).unwrap().is_empty());
        assert_eq!(model.calls, 1);
    }

    #[test]
    fn short_recording_window_is_padded() {
        let (chunks, store) = setup();
        let cache = MemoryEmbeddingCache::new();
        let mut model = FirstFrameModel::new(4);
        let b_chunk: Vec<&Chunk> = chunks.iter().filter(|c| c.recording_key == "b").collect();
        EmbeddingDriver::new(&mut model, &store, &cache, options(4))
            .run(&b_chunk)
            .unwrap();
        assert_eq!(model.seen_shapes, vec![(1, 25, 3)]);
    }

    #[test]
    fn wrong_embedding_length_is_fatal() {
        let (chunks, store) = setup();
        let cache = MemoryEmbeddingCache::new();
        let mut model = FirstFrameModel::new(4);
        model.output_length = 3;
        let pending: Vec<&Chunk> = chunks.iter().collect();
        let err = EmbeddingDriver::new(&mut model, &store, &cache, options(4))
            .run(&pending)
            .unwrap_err();
        match err {
            EvalError::EmbeddingShape {
                key,
                expected,
                actual,
            } => {
                assert_eq!(key, chunks[0].key);
                assert_eq!((expected, actual), (4, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn assemble_prefers_fresh_vectors_over_the_cache() {
        let (chunks, store) = setup();
        let cache = MemoryEmbeddingCache::new();
        let mut model = FirstFrameModel::new(4);
        let a_chunks: Vec<&Chunk> = chunks.iter().filter(|c| c.recording_key == "a").collect();
        let fresh = EmbeddingDriver::new(&mut model, &store, &cache, options(4))
            .run_keyed(&a_chunks)
            .unwrap();
        assert_eq!(fresh.len(), 3);

        // Only "b" has to come from the cache once "a" is in hand.
        let b_only = MemoryEmbeddingCache::new();
        let b_key = &chunks[3].key;
        b_only.put(b_key, &cache.get(&chunks[0].key).unwrap()).unwrap();
        let corpus = EmbeddedCorpus::assemble(&chunks, &fresh, &b_only).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.get("a").unwrap().chunks[1][0], 50.5);
        assert_eq!(corpus.get("b").unwrap().chunks.len(), 1);

        let err = EmbeddedCorpus::assemble(&chunks, &HashMap::new(), &b_only).unwrap_err();
        assert!(matches!(err, EvalError::Cache(_)));
    }

    #[test]
    fn conflicting_labels_are_fatal() {
        let mut corpus = EmbeddedCorpus::new();
        corpus.push("a", &Label::new("1"), vec![1.0]).unwrap();
        let err = corpus.push("a", &Label::new("2"), vec![1.0]).unwrap_err();
        assert!(err.to_string().contains("conflicting labels 1 and 2"));
    }

    #[test]
    fn mirror_dir_receives_copies() {
        let (chunks, store) = setup();
        let cache = MemoryEmbeddingCache::new();
        let dir = tempfile::tempdir().unwrap();
        let mut model = FirstFrameModel::new(4);
        let mut opts = options(4);
        opts.mirror_dir = Some(dir.path().join("mirror"));
        let pending: Vec<&Chunk> = chunks.iter().collect();
        EmbeddingDriver::new(&mut model, &store, &cache, opts)
            .run(&pending)
            .unwrap();
        let copy = npy::read_vector(&dir.path().join("mirror").join(format!("{}.npy", chunks[0].key)))
            .unwrap();
        assert_eq!(copy, cache.get(&chunks[0].key).unwrap());
    }
}
