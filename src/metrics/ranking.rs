use ndarray::{ArrayView1, ArrayView2};
use tracing::{debug, warn};

use super::{RankingBackend, RetrievalMetrics};
use crate::distance::SENTINEL;
use crate::error::EvalError;
use crate::manifest::Label;

/// Per-query ranking by ascending distance, ties broken by column index.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRanking;

#[derive(Debug, Default)]
struct Totals {
    average_precision: f64,
    hits: usize,
    rank1: usize,
    scored: usize,
}

impl StandardRanking {
    /// Sorted candidate columns for one query row, excluded cells removed.
    fn ranked_columns(row: ArrayView1<'_, f32>, top_k: usize) -> Vec<usize> {
        let mut columns: Vec<usize> = row
            .iter()
            .enumerate()
            .filter(|&(_, &distance)| distance != SENTINEL)
            .map(|(col, _)| col)
            .collect();
        columns.sort_by(|&a, &b| row[a].total_cmp(&row[b]).then(a.cmp(&b)));
        columns.truncate(top_k);
        columns
    }
}

impl RankingBackend for StandardRanking {
    fn rank(
        &self,
        distances: ArrayView2<'_, f32>,
        query_labels: &[Label],
        reference_labels: &[Label],
        top_k: usize,
    ) -> Result<RetrievalMetrics, EvalError> {
        let (rows, cols) = distances.dim();
        if query_labels.len() != rows || reference_labels.len() != cols {
            return Err(EvalError::LabelCount {
                rows,
                cols,
                query_labels: query_labels.len(),
                reference_labels: reference_labels.len(),
            });
        }
        let top_k = top_k.max(1);
        let mut totals = Totals::default();

        for (query, row) in distances.rows().into_iter().enumerate() {
            let label = &query_labels[query];
            let relevant = row
                .iter()
                .zip(reference_labels)
                .filter(|&(&distance, candidate)| distance != SENTINEL && candidate == label)
                .count();
            if relevant == 0 {
                debug!("Query {query} ({label}) has no relevant reference, skipped");
                continue;
            }

            let ranked = Self::ranked_columns(row, top_k);
            let mut found = 0usize;
            let mut precision_sum = 0.0f64;
            for (rank, &col) in ranked.iter().enumerate() {
                if &reference_labels[col] == label {
                    found += 1;
                    precision_sum += found as f64 / (rank + 1) as f64;
                }
            }
            totals.scored += 1;
            totals.average_precision += precision_sum / relevant.min(top_k) as f64;
            if found > 0 {
                totals.hits += 1;
            }
            if ranked
                .first()
                .is_some_and(|&col| &reference_labels[col] == label)
            {
                totals.rank1 += 1;
            }
        }

        if totals.scored == 0 {
            warn!("No query has a relevant reference; all metrics are zero");
            return Ok(RetrievalMetrics {
                mean_ap: 0.0,
                hit_rate: 0.0,
                rank1: 0.0,
            });
        }
        let scored = totals.scored as f64;
        Ok(RetrievalMetrics {
            mean_ap: totals.average_precision / scored,
            hit_rate: totals.hits as f64 / scored,
            rank1: totals.rank1 as f64 / scored,
        })
    }
}
