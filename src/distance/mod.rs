//! Query-versus-reference distance matrix.
//!
//! A cell holds the smallest cosine distance between any chunk of the query
//! recording and any chunk of the reference recording: a cover only needs to
//! match in one segment.

mod matrix;
mod pool;

pub use matrix::{DistanceCell, DistanceMatrix, ExclusionSet, SENTINEL, check_output_dir};
pub use pool::{DistanceMatrixBuilder, PairTask};

/// Why two chunk embeddings could not be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairError {
    /// The query side has zero or non-finite norm.
    DegenerateQuery,
    /// The reference side has zero or non-finite norm.
    DegenerateReference,
    DimensionMismatch { query_len: usize, reference_len: usize },
    /// One side has no chunks at all.
    EmptyQuery,
    EmptyReference,
}

/// Copy of `values` scaled to unit L2 norm, or `None` for a zero/non-finite norm.
pub fn l2_normalized(values: &[f32]) -> Option<Vec<f32>> {
    let sum: f32 = values.iter().map(|value| value * value).sum();
    if !sum.is_finite() || sum <= 0.0 {
        return None;
    }
    let norm = sum.sqrt();
    Some(values.iter().map(|value| value / norm).collect())
}

fn distance_between_unit(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (1.0 - dot).clamp(0.0, 2.0)
}

/// `1 - cos(a, b)`, clamped to `[0, 2]`.
///
/// Both vectors are normalized here; swapping the arguments gives the
/// bit-identical result.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, PairError> {
    if a.len() != b.len() {
        return Err(PairError::DimensionMismatch {
            query_len: a.len(),
            reference_len: b.len(),
        });
    }
    let a = l2_normalized(a).ok_or(PairError::DegenerateQuery)?;
    let b = l2_normalized(b).ok_or(PairError::DegenerateReference)?;
    Ok(distance_between_unit(&a, &b))
}

/// Minimum cosine distance over the cross product of two chunk lists.
pub fn min_chunk_distance(query: &[Vec<f32>], reference: &[Vec<f32>]) -> Result<f32, PairError> {
    if query.is_empty() {
        return Err(PairError::EmptyQuery);
    }
    if reference.is_empty() {
        return Err(PairError::EmptyReference);
    }
    let query = query
        .iter()
        .map(|chunk| l2_normalized(chunk).ok_or(PairError::DegenerateQuery))
        .collect::<Result<Vec<_>, _>>()?;
    let reference = reference
        .iter()
        .map(|chunk| l2_normalized(chunk).ok_or(PairError::DegenerateReference))
        .collect::<Result<Vec<_>, _>>()?;

    let mut best = f32::INFINITY;
    for x in &query {
        for y in &reference {
            if x.len() != y.len() {
                return Err(PairError::DimensionMismatch {
                    query_len: x.len(),
                    reference_len: y.len(),
                });
            }
            best = best.min(distance_between_unit(x, y));
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_bit_for_bit() {
        let a = vec![0.3_f32, -1.7, 2.2, 0.01, 5.5];
        let b = vec![-0.9_f32, 0.4, 1.1, 3.3, -2.0];
        let ab = cosine_distance(&a, &b).unwrap();
        let ba = cosine_distance(&b, &a).unwrap();
        assert_eq!(ab.to_bits(), ba.to_bits());

        let q = vec![a.clone(), vec![1.0, 1.0, 1.0, 1.0, 1.0]];
        let r = vec![b.clone()];
        assert_eq!(
            min_chunk_distance(&q, &r).unwrap().to_bits(),
            min_chunk_distance(&r, &q).unwrap().to_bits()
        );
    }

    #[test]
    fn scale_does_not_change_distance() {
        let a = [1.0_f32, 0.0];
        let b = [0.0_f32, 5.0];
        assert_eq!(cosine_distance(&a, &b).unwrap(), 1.0);
        assert_eq!(cosine_distance(&[3.0, 0.0], &[-1.0, 0.0]).unwrap(), 2.0);
        assert_eq!(cosine_distance(&[2.0, 0.0], &[7.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn closest_chunk_pair_wins() {
        let query = vec![vec![1.0_f32, 0.0], vec![0.0, 1.0]];
        let reference = vec![vec![-1.0_f32, 0.0], vec![0.0, 2.0]];
        assert_eq!(min_chunk_distance(&query, &reference).unwrap(), 0.0);
    }

    #[test]
    fn zero_vector_is_degenerate() {
        assert_eq!(
            cosine_distance(&[0.0, 0.0], &[1.0, 0.0]),
            Err(PairError::DegenerateQuery)
        );
        assert_eq!(
            min_chunk_distance(&[vec![1.0]], &[]),
            Err(PairError::EmptyReference)
        );
        assert!(matches!(
            cosine_distance(&[1.0], &[1.0, 0.0]),
            Err(PairError::DimensionMismatch { .. })
        ));
    }
}
