//! Exact backend: cosine against every row.

use std::sync::Arc;

use super::distance::{dot, normalized};
use super::{IndexBackend, VectorIndex, VectorMatrix};
use crate::error::Result;

pub struct ExactIndex {
    rows: Arc<VectorMatrix>,
}

impl ExactIndex {
    /// Build from rows in order, normalizing each one. Every row must have
    /// the first row's dimension, otherwise row ids would shift.
    pub fn new<'a>(rows: impl IntoIterator<Item = &'a [f32]>) -> Result<Self> {
        let mut rows = rows.into_iter().peekable();
        let dim = rows.peek().map(|r| r.len()).unwrap_or(0);
        let mut matrix = VectorMatrix::new(dim);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(Self::from_shared(Arc::new(matrix.normalized())))
    }

    /// Share already unit-length rows.
    pub fn from_shared(rows: Arc<VectorMatrix>) -> Self {
        Self { rows }
    }
}

impl VectorIndex for ExactIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Exact
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn search(&self, query: &[f32], top_n: usize) -> Vec<(usize, f32)> {
        if top_n == 0 || query.len() != self.rows.dim() {
            return Vec::new();
        }
        let query = normalized(query);

        let mut scored: Vec<(usize, f32)> = self
            .rows
            .rows()
            .enumerate()
            .map(|(row, vector)| (row, dot(vector, &query)))
            .collect();
        // stable: equal scores keep row order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_n);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_ranking() {
        let rows: Vec<Vec<f32>> = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.6, 0.8]];
        let index = ExactIndex::new(rows.iter().map(Vec::as_slice)).unwrap();

        let results = index.search(&[1.0, 0.0], 3);
        let order: Vec<usize> = results.iter().map(|(row, _)| *row).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!((results[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 1.0], vec![0.0, 1.0], vec![1.0, 1.0], vec![1.0, 1.0]];
        let index = ExactIndex::new(rows.iter().map(Vec::as_slice)).unwrap();

        let order: Vec<usize> = index.search(&[1.0, 1.0], 4).iter().map(|(r, _)| *r).collect();
        assert_eq!(order, vec![0, 2, 3, 1]);
    }

    #[test]
    fn test_top_n_and_dimension() {
        let rows: Vec<Vec<f32>> = (0..10).map(|i| vec![1.0, i as f32]).collect();
        let index = ExactIndex::new(rows.iter().map(Vec::as_slice)).unwrap();

        assert_eq!(index.len(), 10);
        assert_eq!(index.search(&[1.0, 0.0], 3).len(), 3);
        assert!(index.search(&[1.0, 0.0], 0).is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 3).is_empty());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.0, 1.0]];
        assert!(ExactIndex::new(rows.iter().map(Vec::as_slice)).is_err());
    }

    proptest! {
        #[test]
        fn test_scores_never_increase(
            rows in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 1..40),
            query in prop::collection::vec(-1.0f32..1.0, 4),
            top_n in 1usize..50,
        ) {
            let index = ExactIndex::new(rows.iter().map(Vec::as_slice)).unwrap();
            let results = index.search(&query, top_n);

            prop_assert!(results.len() <= top_n.min(rows.len()));
            for pair in results.windows(2) {
                prop_assert!(pair[0].1 >= pair[1].1);
                if pair[0].1.to_bits() == pair[1].1.to_bits() {
                    prop_assert!(pair[0].0 < pair[1].0);
                }
            }
        }
    }
}
