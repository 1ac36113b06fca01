//! Retrieval evaluation for cover-song embeddings.
/// Application data and log directories.
pub mod app_dirs;
/// Chunk embedding cache backends.
pub mod cache;
/// Fixed-window chunking of recordings.
pub mod chunker;
/// Evaluation settings loaded from TOML.
pub mod config;
/// Pairwise cosine distances between recordings.
pub mod distance;
/// Batched model inference over uncached chunks.
pub mod driver;
/// Error types shared by the pipeline.
pub mod error;
/// End-to-end evaluation runs.
pub mod eval;
/// Feature loading and windowing.
pub mod features;
/// Tracing setup for binaries.
pub mod logging;
/// Manifest line codec and recordings.
pub mod manifest;
/// Ranking metrics over a distance matrix.
pub mod metrics;
/// Embedding model interface.
pub mod model;
/// Minimal `.npy` reader and writer.
pub mod npy;

pub use config::EvalConfig;
pub use error::EvalError;
pub use eval::{EvalOutcome, EvalPaths, evaluate};
