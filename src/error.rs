//! Error taxonomy for an evaluation run.
//!
//! Every variant is fatal for the run that raised it. Cache misses are not
//! errors and never surface here.

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::manifest::ManifestError;
use crate::model::ModelError;
use crate::npy::NpyError;

/// Errors raised while chunking, embedding, building or scoring a run.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Declared model input frames disagree with `chunk_s * FRAME_RATE`.
    #[error(
        "Chunk frame mismatch: model expects {infer_frames} frames but chunk_s {chunk_s} x {frame_rate} fps = {expected}"
    )]
    ChunkFrameMismatch {
        infer_frames: usize,
        chunk_s: f64,
        frame_rate: usize,
        expected: f64,
    },
    /// An embedding returned by the model has the wrong length.
    #[error("Embedding for chunk {key} has length {actual}, model declares {expected}")]
    EmbeddingShape {
        key: String,
        expected: usize,
        actual: usize,
    },
    /// The model returned a different number of rows than the batch size.
    #[error("Model returned {actual} embeddings for a batch of {expected} chunks")]
    BatchShape { expected: usize, actual: usize },
    /// A chunk's pooled features do not match the rest of its batch.
    #[error("Features for chunk {key} have shape {actual:?}, batch expects {expected:?}")]
    FeatureShape {
        key: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// The same recording was seen with two different labels.
    #[error("Recording {key} has conflicting labels {first} and {second}")]
    LabelConflict {
        key: String,
        first: String,
        second: String,
    },
    /// An exclusion pair points outside the query or reference set.
    #[error("Exclusion pair ({query}, {reference}) out of bounds for {side} size {len}")]
    ExclusionOutOfBounds {
        query: usize,
        reference: usize,
        side: &'static str,
        len: usize,
    },
    /// A caller-supplied output directory does not exist.
    #[error("Output directory does not exist: {path}")]
    MissingOutputDir { path: PathBuf },
    /// A recording key contains the reserved chunk delimiter.
    #[error("Recording key {key:?} contains the reserved chunk delimiter")]
    DelimiterInKey { key: String },
    /// A chunk embedding has zero or non-finite norm.
    #[error("Embedding for recording {key} has a zero or non-finite norm")]
    DegenerateEmbedding { key: String },
    /// Two chunk embeddings being compared have different lengths.
    #[error("Cannot compare {query} ({query_len} dims) with {reference} ({reference_len} dims)")]
    DimensionMismatch {
        query: String,
        reference: String,
        query_len: usize,
        reference_len: usize,
    },
    /// A recording has no chunk embeddings to compare.
    #[error("Recording {key} has no chunk embeddings")]
    EmptyRecording { key: String },
    /// Chunks still lack embeddings and no model was provided.
    #[error("{count} chunks have no cached embedding (first: {first_key}) and no model was given")]
    MissingEmbeddings { count: usize, first_key: String },
    /// A distance worker stopped before finishing its share of the grid.
    #[error("Distance worker failed: {0}")]
    Worker(String),
    /// Label sequences handed to a ranking backend do not fit the matrix.
    #[error("Matrix is {rows}x{cols} but got {query_labels} query and {reference_labels} reference labels")]
    LabelCount {
        rows: usize,
        cols: usize,
        query_labels: usize,
        reference_labels: usize,
    },
    /// The ranking backend returned something that is not a metric.
    #[error("Ranking backend returned invalid {name}: {value}")]
    InvalidMetric { name: &'static str, value: f64 },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Npy(#[from] NpyError),
    /// Filesystem failure outside the cache.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
