//! End-to-end evaluation of a query manifest against a reference manifest.
//!
//! Chunk manifests land in `{embed_dir}/query.txt` and `{embed_dir}/ref.txt`,
//! chunk embeddings in `{embed_dir}/query_embed/`. Query and reference chunks
//! share that cache directory, so a reference manifest identical to the query
//! manifest costs nothing extra.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::cache::{EmbeddingCache, FsEmbeddingCache};
use crate::chunker::{Chunk, Chunker};
use crate::config::EvalConfig;
use crate::distance::{DistanceMatrix, DistanceMatrixBuilder, ExclusionSet, check_output_dir};
use crate::driver::{DriverOptions, EmbeddedCorpus, EmbeddingDriver};
use crate::error::EvalError;
use crate::features::FeatureStore;
use crate::manifest::{self, Label, Recording};
use crate::metrics::{self, RankingBackend, RetrievalMetrics};
use crate::model::EmbeddingModel;

/// Cache subdirectory under `embed_dir`.
pub const EMBED_SUBDIR: &str = "query_embed";
pub const QUERY_CHUNK_MANIFEST: &str = "query.txt";
pub const REF_CHUNK_MANIFEST: &str = "ref.txt";

/// Inputs and outputs of one run.
#[derive(Debug, Clone)]
pub struct EvalPaths {
    pub query: PathBuf,
    pub reference: PathBuf,
    /// Optional file whose `query_in_ref` pairs are excluded from ranking.
    pub query_in_ref: Option<PathBuf>,
    pub embed_dir: PathBuf,
    /// Stem for the persisted matrix and reference labels.
    pub dist_name: Option<PathBuf>,
    /// Extra cache subdirectory keeping one model's vectors apart from another's.
    pub model_tag: Option<String>,
    /// Directory that also receives a `.npy` copy of every newly computed
    /// chunk embedding.
    pub mirror_dir: Option<PathBuf>,
}

impl EvalPaths {
    pub fn new(
        query: impl Into<PathBuf>,
        reference: impl Into<PathBuf>,
        embed_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            query: query.into(),
            reference: reference.into(),
            query_in_ref: None,
            embed_dir: embed_dir.into(),
            dist_name: None,
            model_tag: None,
            mirror_dir: None,
        }
    }

    /// Directory holding the chunk embedding cache.
    pub fn cache(&self) -> FsEmbeddingCache {
        let cache = FsEmbeddingCache::new(self.embed_dir.join(EMBED_SUBDIR));
        match &self.model_tag {
            Some(tag) => cache.with_model_tag(tag),
            None => cache,
        }
    }

    fn self_retrieval(&self) -> bool {
        self.query == self.reference
    }
}

/// Result of a run: the scores and the matrix they were computed from.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub metrics: RetrievalMetrics,
    pub matrix: DistanceMatrix,
    /// Chunk embeddings computed by the model during this run.
    pub computed: usize,
}

/// Chunk, embed, build the distance matrix and score it.
///
/// With no model every chunk must already be cached; otherwise the run
/// fails with [`EvalError::MissingEmbeddings`].
pub fn evaluate(
    config: &EvalConfig,
    model: Option<&mut dyn EmbeddingModel>,
    features: &dyn FeatureStore,
    backend: &dyn RankingBackend,
    paths: &EvalPaths,
) -> Result<EvalOutcome, EvalError> {
    config.validate()?;
    if let Some(dist_name) = &paths.dist_name {
        check_output_dir(dist_name)?;
    }
    let self_retrieval = paths.self_retrieval();

    let query_recordings = manifest::read_recordings(&paths.query)?;
    info!("query lines: {}", query_recordings.len());
    let reference_recordings = if self_retrieval {
        query_recordings.clone()
    } else {
        manifest::read_recordings(&paths.reference)?
    };
    info!("ref lines: {}", reference_recordings.len());
    check_labels(&query_recordings, &reference_recordings)?;

    let exclusions = match &paths.query_in_ref {
        Some(path) => {
            let pairs = manifest::read_exclusion_pairs(path)?;
            let set = ExclusionSet::from_pairs(
                pairs,
                query_recordings.len(),
                reference_recordings.len(),
            )?;
            info!("query-in-ref exclusions: {}", set.len());
            Some(set)
        }
        None => None,
    };

    let cache = paths.cache();
    let chunker = Chunker::new(config.chunk_s, config.chunk_s)?;
    let query_chunks = chunk_and_record(
        &chunker,
        &query_recordings,
        &cache,
        &paths.embed_dir.join(QUERY_CHUNK_MANIFEST),
    )?;
    info!("query chunks: {}", query_chunks.len());
    let reference_chunks = chunk_and_record(
        &chunker,
        &reference_recordings,
        &cache,
        &paths.embed_dir.join(REF_CHUNK_MANIFEST),
    )?;
    info!("ref chunks: {}", reference_chunks.len());

    let groups: Vec<&[Chunk]> = if self_retrieval {
        vec![query_chunks.as_slice()]
    } else {
        vec![query_chunks.as_slice(), reference_chunks.as_slice()]
    };
    let fresh = embed_pending(config, model, features, &cache, paths, &groups)?;

    let query = EmbeddedCorpus::assemble(&query_chunks, &fresh, &cache)?;
    let reference = if self_retrieval {
        None
    } else {
        Some(EmbeddedCorpus::assemble(&reference_chunks, &fresh, &cache)?)
    };
    let builder = config
        .workers
        .map(DistanceMatrixBuilder::with_workers)
        .unwrap_or_default();
    let matrix = builder.build(&query, reference.as_ref(), exclusions.as_ref())?;

    if let Some(dist_name) = &paths.dist_name {
        matrix.save(dist_name)?;
    }
    let metrics = metrics::evaluate(backend, &matrix, config.top_k)?;
    Ok(EvalOutcome {
        metrics,
        matrix,
        computed: fresh.len(),
    })
}

/// A recording key must carry one label across both manifests.
fn check_labels(query: &[Recording], reference: &[Recording]) -> Result<(), EvalError> {
    let mut labels: HashMap<&str, &Label> = HashMap::new();
    for recording in query.iter().chain(reference) {
        let first = *labels
            .entry(recording.key.as_str())
            .or_insert(&recording.label);
        if first != &recording.label {
            return Err(EvalError::LabelConflict {
                key: recording.key.clone(),
                first: first.to_string(),
                second: recording.label.to_string(),
            });
        }
    }
    Ok(())
}

/// Chunk `recordings`, point each chunk at its cache entry and write the
/// chunk manifest to `manifest_path`.
fn chunk_and_record(
    chunker: &Chunker,
    recordings: &[Recording],
    cache: &FsEmbeddingCache,
    manifest_path: &Path,
) -> Result<Vec<Chunk>, EvalError> {
    let mut chunks = chunker.chunk_all(recordings)?;
    for chunk in &mut chunks {
        chunk.record.set("embed", cache.locate(&chunk.key));
    }
    if let Some(parent) = manifest_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| EvalError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let lines: Vec<String> = chunks.iter().map(|chunk| chunk.record.to_line()).collect();
    manifest::write_lines(manifest_path, &lines)?;
    Ok(chunks)
}

fn embed_pending(
    config: &EvalConfig,
    model: Option<&mut dyn EmbeddingModel>,
    features: &dyn FeatureStore,
    cache: &FsEmbeddingCache,
    paths: &EvalPaths,
    groups: &[&[Chunk]],
) -> Result<HashMap<String, Vec<f32>>, EvalError> {
    let mut seen = HashSet::new();
    let pending: Vec<&Chunk> = groups
        .iter()
        .copied()
        .flat_map(|chunks| chunks.iter())
        .filter(|chunk| !cache.has(&chunk.key) && seen.insert(chunk.key.as_str()))
        .collect();
    info!("to compute: {}", pending.len());
    let Some(first) = pending.first() else {
        return Ok(HashMap::new());
    };
    let Some(model) = model else {
        return Err(EvalError::MissingEmbeddings {
            count: pending.len(),
            first_key: first.key.clone(),
        });
    };
    let options = DriverOptions {
        batch_size: config.batch_size,
        infer_frames: config.infer_frames(),
        mean_size: config.mean_size,
        mirror_dir: paths.mirror_dir.clone(),
    };
    EmbeddingDriver::new(model, features, cache, options).run_keyed(&pending)
}
