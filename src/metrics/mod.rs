//! Ranking-quality metrics over a finished distance matrix.

mod ranking;

pub use ranking::StandardRanking;

use ndarray::ArrayView2;
use serde::Serialize;
use tracing::info;

use crate::distance::DistanceMatrix;
use crate::error::EvalError;
use crate::manifest::Label;

/// Scores returned for one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrievalMetrics {
    /// Mean average precision at the rank cutoff.
    pub mean_ap: f64,
    pub hit_rate: f64,
    pub rank1: f64,
}

/// Something that scores a raw distance matrix against its labels.
///
/// Cells equal to [`crate::distance::SENTINEL`] are excluded pairs and must
/// never be ranked.
pub trait RankingBackend {
    fn rank(
        &self,
        distances: ArrayView2<'_, f32>,
        query_labels: &[Label],
        reference_labels: &[Label],
        top_k: usize,
    ) -> Result<RetrievalMetrics, EvalError>;
}

impl<B: RankingBackend + ?Sized> RankingBackend for &B {
    fn rank(
        &self,
        distances: ArrayView2<'_, f32>,
        query_labels: &[Label],
        reference_labels: &[Label],
        top_k: usize,
    ) -> Result<RetrievalMetrics, EvalError> {
        (**self).rank(distances, query_labels, reference_labels, top_k)
    }
}

/// Hand `matrix` to `backend` and reject anything that is not a proportion.
pub fn evaluate(
    backend: &dyn RankingBackend,
    matrix: &DistanceMatrix,
    top_k: usize,
) -> Result<RetrievalMetrics, EvalError> {
    let (rows, cols) = matrix.shape();
    info!("Ranking {rows} queries against {cols} references (top_k={top_k})");
    let raw = matrix.to_sentinel_array();
    let metrics = backend.rank(
        raw.view(),
        matrix.query_labels(),
        matrix.reference_labels(),
        top_k,
    )?;
    for (name, value) in [
        ("mAP", metrics.mean_ap),
        ("hit rate", metrics.hit_rate),
        ("rank-1", metrics.rank1),
    ] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(EvalError::InvalidMetric { name, value });
        }
    }
    info!(
        "mAP: {:.5} hit rate: {:.5} rank-1: {:.5}",
        metrics.mean_ap, metrics.hit_rate, metrics.rank1
    );
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::ExclusionSet;
    use ndarray::array;

    struct Fixed(RetrievalMetrics);

    impl RankingBackend for Fixed {
        fn rank(
            &self,
            distances: ArrayView2<'_, f32>,
            _query_labels: &[Label],
            _reference_labels: &[Label],
            _top_k: usize,
        ) -> Result<RetrievalMetrics, EvalError> {
            assert_eq!(distances[[0, 0]], -1.0);
            Ok(self.0)
        }
    }

    fn matrix() -> DistanceMatrix {
        let labels = vec![Label::new("a"), Label::new("a")];
        DistanceMatrix::from_raw(
            &array![[0.0_f32, 0.2], [0.2, 0.0]],
            &ExclusionSet::diagonal(2),
            labels.clone(),
            labels,
        )
    }

    #[test]
    fn backend_sees_sentinel_cells() {
        let expected = RetrievalMetrics {
            mean_ap: 0.5,
            hit_rate: 1.0,
            rank1: 0.5,
        };
        let metrics = evaluate(&Fixed(expected), &matrix(), 10).unwrap();
        assert_eq!(metrics, expected);
    }

    #[test]
    fn out_of_range_output_is_rejected() {
        let backend = Fixed(RetrievalMetrics {
            mean_ap: f64::NAN,
            hit_rate: 1.0,
            rank1: 0.0,
        });
        let err = evaluate(&backend, &matrix(), 10).unwrap_err();
        assert!(matches!(err, EvalError::InvalidMetric { name: "mAP", .. }));

        let backend = Fixed(RetrievalMetrics {
            mean_ap: 0.1,
            hit_rate: 1.5,
            rank1: 0.0,
        });
        let err = evaluate(&backend, &matrix(), 10).unwrap_err();
        assert!(matches!(err, EvalError::InvalidMetric { name: "hit rate", .. }));
    }
}
