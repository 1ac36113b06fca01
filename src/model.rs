//! Interface to the embedding model.
//!
//! Loading weights and choosing a device live with the model implementation;
//! the engine only needs batched inference and the declared output length.

use ndarray::{Array2, ArrayView3};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Model inference failed: {0}")]
pub struct ModelError(pub String);

/// Output of one inference call.
#[derive(Debug, Clone)]
pub struct Inference {
    /// `[batch, embed_length]`, one row per input chunk.
    pub embeddings: Array2<f32>,
    /// Model-specific side output (class logits and the like); unused here.
    pub auxiliary: Option<Array2<f32>>,
}

/// A loaded, ready-to-run embedding model.
///
/// Inference is a blocking call; the model owns its device and is used from
/// one thread only.
pub trait EmbeddingModel {
    /// Length of every embedding row this model produces.
    fn embed_length(&self) -> usize;

    /// Embed a `[batch, frames, bins]` tensor of pooled chunk features.
    fn inference(&mut self, batch: ArrayView3<'_, f32>) -> Result<Inference, ModelError>;
}

impl<M: EmbeddingModel + ?Sized> EmbeddingModel for &mut M {
    fn embed_length(&self) -> usize {
        (**self).embed_length()
    }

    fn inference(&mut self, batch: ArrayView3<'_, f32>) -> Result<Inference, ModelError> {
        (**self).inference(batch)
    }
}
