use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::channel;

use ndarray::Array2;
use tracing::{debug, info};

use super::matrix::{DistanceMatrix, ExclusionSet};
use super::{PairError, min_chunk_distance};
use crate::driver::{EmbeddedCorpus, EmbeddedRecording};
use crate::error::EvalError;

/// Grid cells a worker claims per cursor bump.
const CELLS_PER_CLAIM: usize = 64;

/// One `(query, reference)` cell of the grid.
#[derive(Debug, Clone, Copy)]
pub struct PairTask<'a> {
    pub row: usize,
    pub col: usize,
    pub query: &'a EmbeddedRecording,
    pub reference: &'a EmbeddedRecording,
}

impl PairTask<'_> {
    /// Smallest chunk-to-chunk cosine distance for this pair.
    pub fn run(&self) -> Result<f32, EvalError> {
        min_chunk_distance(&self.query.chunks, &self.reference.chunks)
            .map_err(|err| self.describe(err))
    }

    fn describe(&self, err: PairError) -> EvalError {
        match err {
            PairError::DegenerateQuery => EvalError::DegenerateEmbedding {
                key: self.query.key.clone(),
            },
            PairError::DegenerateReference => EvalError::DegenerateEmbedding {
                key: self.reference.key.clone(),
            },
            PairError::EmptyQuery => EvalError::EmptyRecording {
                key: self.query.key.clone(),
            },
            PairError::EmptyReference => EvalError::EmptyRecording {
                key: self.reference.key.clone(),
            },
            PairError::DimensionMismatch {
                query_len,
                reference_len,
            } => EvalError::DimensionMismatch {
                query: self.query.key.clone(),
                reference: self.reference.key.clone(),
                query_len,
                reference_len,
            },
        }
    }
}

/// Fans the query x reference grid out over a bounded pool of threads.
#[derive(Debug, Clone)]
pub struct DistanceMatrixBuilder {
    workers: usize,
}

impl Default for DistanceMatrixBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DistanceMatrixBuilder {
    /// One worker per available core.
    pub fn new() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { workers }
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Build the matrix for `query` against `reference`.
    ///
    /// Without a reference set the query set is compared with itself and the
    /// diagonal is excluded in addition to any supplied pairs. Exclusions are
    /// applied after every distance is computed.
    pub fn build(
        &self,
        query: &EmbeddedCorpus,
        reference: Option<&EmbeddedCorpus>,
        exclusions: Option<&ExclusionSet>,
    ) -> Result<DistanceMatrix, EvalError> {
        let (reference, exclusions) = match reference {
            Some(reference) => (reference, exclusions.cloned().unwrap_or_default()),
            None => {
                let diagonal = ExclusionSet::diagonal(query.len());
                let merged = match exclusions {
                    Some(extra) => diagonal.merge(extra),
                    None => diagonal,
                };
                (query, merged)
            }
        };
        exclusions.check_bounds(query.len(), reference.len())?;

        let raw = self.raw_distances(query, reference)?;
        let matrix = DistanceMatrix::from_raw(&raw, &exclusions, query.labels(), reference.labels());
        info!(
            "Distance matrix {}x{} built, {} cells excluded",
            query.len(),
            reference.len(),
            matrix.excluded_count()
        );
        Ok(matrix)
    }

    /// Every pair distance with no exclusions applied.
    pub fn raw_distances(
        &self,
        query: &EmbeddedCorpus,
        reference: &EmbeddedCorpus,
    ) -> Result<Array2<f32>, EvalError> {
        let rows = query.len();
        let cols = reference.len();
        let mut raw = Array2::<f32>::zeros((rows, cols));
        let total = rows * cols;
        if total == 0 {
            return Ok(raw);
        }

        let queries = query.recordings();
        let references = reference.recordings();
        let cursor = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let worker_count = self.workers.min(total).max(1);
        debug!("Dispatching {total} pair tasks to {worker_count} workers");

        let (tx, rx) = channel::<(usize, usize, Result<f32, EvalError>)>();
        let mut filled = 0usize;
        let mut first_error: Option<EvalError> = None;
        let mut panicked = 0usize;

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..worker_count)
                .map(|_| {
                    let cursor = &cursor;
                    let abort = &abort;
                    let tx = tx.clone();
                    scope.spawn(move || {
                        loop {
                            if abort.load(Ordering::Relaxed) {
                                return;
                            }
                            let claimed = claim(cursor, total, CELLS_PER_CLAIM);
                            if claimed.is_empty() {
                                return;
                            }
                            for cell in claimed {
                                let (row, col) = (cell / cols, cell % cols);
                                let task = PairTask {
                                    row,
                                    col,
                                    query: &queries[row],
                                    reference: &references[col],
                                };
                                let result = task.run();
                                if result.is_err() {
                                    abort.store(true, Ordering::Relaxed);
                                }
                                if tx.send((task.row, task.col, result)).is_err() {
                                    return;
                                }
                            }
                        }
                    })
                })
                .collect();
            drop(tx);

            for (row, col, result) in rx {
                match result {
                    Ok(distance) => {
                        raw[[row, col]] = distance;
                        filled += 1;
                    }
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            for handle in handles {
                if handle.join().is_err() {
                    panicked += 1;
                }
            }
        });

        if let Some(err) = first_error {
            return Err(err);
        }
        if panicked > 0 {
            return Err(EvalError::Worker(format!("{panicked} distance workers panicked")));
        }
        if filled != total {
            return Err(EvalError::Worker(format!(
                "only {filled} of {total} matrix cells were computed"
            )));
        }
        Ok(raw)
    }
}

/// Take the next run of at most `max` flat cell indices below `total`.
fn claim(cursor: &AtomicUsize, total: usize, max: usize) -> Range<usize> {
    let start = cursor.fetch_add(max, Ordering::Relaxed).min(total);
    start..(start + max).min(total)
}
