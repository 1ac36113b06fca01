use covermatch::model::{EmbeddingModel, Inference, ModelError};
use ndarray::{Array2, ArrayView3, s};

/// Embeds each chunk as its first pooled frame, zero-extended to
/// `embed_length`, and counts inference calls.
pub struct CountingModel {
    pub embed_length: usize,
    pub calls: usize,
    pub chunks_seen: usize,
}

impl CountingModel {
    pub fn new(embed_length: usize) -> Self {
        Self {
            embed_length,
            calls: 0,
            chunks_seen: 0,
        }
    }
}

impl EmbeddingModel for CountingModel {
    fn embed_length(&self) -> usize {
        self.embed_length
    }

    fn inference(&mut self, batch: ArrayView3<'_, f32>) -> Result<Inference, ModelError> {
        self.calls += 1;
        let (rows, _, bins) = batch.dim();
        self.chunks_seen += rows;
        let mut embeddings = Array2::zeros((rows, self.embed_length));
        let width = bins.min(self.embed_length);
        for row in 0..rows {
            embeddings
                .slice_mut(s![row, ..width])
                .assign(&batch.slice(s![row, 0, ..width]));
        }
        Ok(Inference {
            embeddings,
            auxiliary: None,
        })
    }
}
