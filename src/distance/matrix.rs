use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::info;

use crate::error::EvalError;
use crate::manifest::Label;
use crate::npy;

/// Numeric stand-in for [`DistanceCell::Excluded`] in exported arrays.
pub const SENTINEL: f32 = -1.0;

/// One matrix cell: a real distance or a pair removed from ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceCell {
    Valid(f32),
    Excluded,
}

impl DistanceCell {
    pub fn distance(self) -> Option<f32> {
        match self {
            DistanceCell::Valid(distance) => Some(distance),
            DistanceCell::Excluded => None,
        }
    }

    /// Flatten to a raw number, using [`SENTINEL`] for excluded cells.
    pub fn to_sentinel(self) -> f32 {
        self.distance().unwrap_or(SENTINEL)
    }
}

/// `(query index, reference index)` pairs forced out of ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    pairs: BTreeSet<(usize, usize)>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(i, i)` for `i < len`: self-retrieval mode.
    pub fn diagonal(len: usize) -> Self {
        Self {
            pairs: (0..len).map(|idx| (idx, idx)).collect(),
        }
    }

    /// Validate pairs eagerly against the query and reference sizes.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (usize, usize)>,
        query_len: usize,
        reference_len: usize,
    ) -> Result<Self, EvalError> {
        let set = Self {
            pairs: pairs.into_iter().collect(),
        };
        set.check_bounds(query_len, reference_len)?;
        Ok(set)
    }

    pub fn check_bounds(&self, query_len: usize, reference_len: usize) -> Result<(), EvalError> {
        for &(query, reference) in &self.pairs {
            if query >= query_len {
                return Err(EvalError::ExclusionOutOfBounds {
                    query,
                    reference,
                    side: "query",
                    len: query_len,
                });
            }
            if reference >= reference_len {
                return Err(EvalError::ExclusionOutOfBounds {
                    query,
                    reference,
                    side: "reference",
                    len: reference_len,
                });
            }
        }
        Ok(())
    }

    pub fn merge(mut self, other: &ExclusionSet) -> Self {
        self.pairs.extend(other.pairs.iter().copied());
        self
    }

    pub fn contains(&self, query: usize, reference: usize) -> bool {
        self.pairs.contains(&(query, reference))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.pairs.iter().copied()
    }
}

/// Dense `[queries, references]` matrix with the labels of both axes.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    cells: Array2<DistanceCell>,
    query_labels: Vec<Label>,
    reference_labels: Vec<Label>,
}

impl DistanceMatrix {
    /// Wrap raw distances, marking every pair in `exclusions` as excluded.
    pub(crate) fn from_raw(
        raw: &Array2<f32>,
        exclusions: &ExclusionSet,
        query_labels: Vec<Label>,
        reference_labels: Vec<Label>,
    ) -> Self {
        let mut cells = raw.mapv(DistanceCell::Valid);
        for (query, reference) in exclusions.iter() {
            if let Some(cell) = cells.get_mut((query, reference)) {
                *cell = DistanceCell::Excluded;
            }
        }
        Self {
            cells,
            query_labels,
            reference_labels,
        }
    }

    /// `(queries, references)`
    pub fn shape(&self) -> (usize, usize) {
        self.cells.dim()
    }

    pub fn get(&self, query: usize, reference: usize) -> Option<DistanceCell> {
        self.cells.get((query, reference)).copied()
    }

    pub fn cells(&self) -> &Array2<DistanceCell> {
        &self.cells
    }

    pub fn query_labels(&self) -> &[Label] {
        &self.query_labels
    }

    pub fn reference_labels(&self) -> &[Label] {
        &self.reference_labels
    }

    pub fn excluded_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| matches!(cell, DistanceCell::Excluded))
            .count()
    }

    /// Raw numeric matrix with [`SENTINEL`] in excluded cells.
    pub fn to_sentinel_array(&self) -> Array2<f32> {
        self.cells.mapv(DistanceCell::to_sentinel)
    }

    /// Write `{stem}.npy` and `{stem}.reflabels.json` next to `dist_name`.
    ///
    /// A `.npy` suffix on `dist_name` is optional. The parent directory must
    /// already exist.
    pub fn save(&self, dist_name: &Path) -> Result<(PathBuf, PathBuf), EvalError> {
        check_output_dir(dist_name)?;
        let (matrix_path, labels_path) = artifact_paths(dist_name);
        npy::write_matrix(&matrix_path, self.to_sentinel_array().view())?;
        let labels = serde_json::to_vec(&self.reference_labels).map_err(|err| EvalError::Io {
            path: labels_path.clone(),
            source: std::io::Error::other(err),
        })?;
        std::fs::write(&labels_path, labels).map_err(|source| EvalError::Io {
            path: labels_path.clone(),
            source,
        })?;
        info!("distance matrix saved to: {}", matrix_path.display());
        info!("ref labels saved to: {}", labels_path.display());
        Ok((matrix_path, labels_path))
    }
}

/// Fail unless the directory that will hold the artifacts of `dist_name`
/// already exists.
pub fn check_output_dir(dist_name: &Path) -> Result<(), EvalError> {
    let (matrix_path, _) = artifact_paths(dist_name);
    match matrix_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            Err(EvalError::MissingOutputDir {
                path: parent.to_path_buf(),
            })
        }
        _ => Ok(()),
    }
}

fn artifact_paths(dist_name: &Path) -> (PathBuf, PathBuf) {
    let text = dist_name.to_string_lossy();
    let stem = text.strip_suffix(".npy").unwrap_or(&text);
    (
        PathBuf::from(format!("{stem}.npy")),
        PathBuf::from(format!("{stem}.reflabels.json")),
    )
}
