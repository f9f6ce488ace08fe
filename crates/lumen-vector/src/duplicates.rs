//! Near-duplicate detection over the embedding store.
//!
//! Builds a graph with an edge between every pair of images whose distance
//! is within the effective threshold and returns its connected components.
//! Grouping is transitive: if A~B and B~C then A, B and C share a group even
//! when A and C are further apart than the threshold.
//!
//! Cost is O(n²) distance evaluations over all embedded images. That is the
//! scaling limit of this detector; it is meant for galleries in the tens of
//! thousands, not millions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};
use uuid::Uuid;

use lumen_core::defaults::MAX_COSINE_DISTANCE;
use lumen_core::{DuplicateGroup, Error, Result};

use crate::distance::cosine_distance;
use crate::store::EmbeddingStore;

/// Map a user-facing threshold in `(0, 1]` to a cosine distance cut-off.
///
/// The threshold is a fraction of the largest possible cosine distance, so
/// the cut-off is `threshold × 2`.
pub fn effective_distance(threshold: f64) -> Result<f64> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(Error::InvalidInput(format!(
            "duplicate threshold must be in (0, 1], got {}",
            threshold
        )));
    }
    Ok(threshold * MAX_COSINE_DISTANCE)
}

/// Disjoint-set forest with path halving and union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// Groups near-identical images from an [`EmbeddingStore`].
pub struct DuplicateGrouper {
    store: Arc<EmbeddingStore>,
}

impl DuplicateGrouper {
    pub fn new(store: Arc<EmbeddingStore>) -> Self {
        Self { store }
    }

    /// Find duplicate groups for a threshold in `(0, 1]`.
    ///
    /// Members of each group are sorted by id and groups are ordered by
    /// their first member, so output is stable across runs.
    #[instrument(skip(self), fields(subsystem = "vector", component = "duplicate_grouper", op = "find_groups"))]
    pub fn find_groups(&self, threshold: f64) -> Result<Vec<DuplicateGroup>> {
        let max_distance = effective_distance(threshold)?;
        let start = Instant::now();

        // Snapshot is sorted by id, which fixes member order below.
        let entries = self.store.snapshot();
        let n = entries.len();
        let mut sets = UnionFind::new(n);

        for i in 0..n {
            for j in (i + 1)..n {
                if cosine_distance(&entries[i].1, &entries[j].1) <= max_distance {
                    sets.union(i, j);
                }
            }
        }

        let mut components: HashMap<usize, Vec<Uuid>> = HashMap::new();
        for (i, (image_id, _)) in entries.iter().enumerate() {
            components.entry(sets.find(i)).or_default().push(*image_id);
        }

        let mut groups: Vec<DuplicateGroup> = components
            .into_values()
            .filter(|members| members.len() >= 2)
            .map(|image_ids| DuplicateGroup { image_ids })
            .collect();
        groups.sort_unstable_by(|a, b| a.image_ids[0].cmp(&b.image_ids[0]));

        debug!(
            images = n,
            groups = groups.len(),
            max_distance,
            duration_ms = start.elapsed().as_millis() as u64,
            "Duplicate scan finished"
        );
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn grouper(vectors: &[(u128, [f32; 2])]) -> DuplicateGrouper {
        let store = Arc::new(EmbeddingStore::with_dimension(2));
        for (n, v) in vectors {
            store.upsert(id(*n), v.to_vec()).unwrap();
        }
        DuplicateGrouper::new(store)
    }

    #[test]
    fn test_effective_distance_doubles() {
        assert_eq!(effective_distance(0.5).unwrap(), 1.0);
        assert_eq!(effective_distance(1.0).unwrap(), 2.0);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        for t in [0.0, -0.1, 1.01, f64::NAN] {
            assert!(effective_distance(t).is_err(), "threshold {} accepted", t);
        }
        assert!(grouper(&[]).find_groups(0.0).is_err());
    }

    #[test]
    fn test_identical_vectors_grouped_for_tiny_threshold() {
        let g = grouper(&[(2, [0.6, 0.8]), (1, [0.6, 0.8]), (3, [1.0, 0.0])]);
        let groups = g.find_groups(f64::MIN_POSITIVE).unwrap();
        assert_eq!(groups, vec![DuplicateGroup { image_ids: vec![id(1), id(2)] }]);
    }

    #[test]
    fn test_distance_above_threshold_not_grouped() {
        // Orthogonal: distance 1.0, effective threshold 0.98.
        let g = grouper(&[(1, [1.0, 0.0]), (2, [0.0, 1.0])]);
        assert!(g.find_groups(0.49).unwrap().is_empty());
        // Effective threshold 1.0 admits the pair.
        assert_eq!(g.find_groups(0.5).unwrap().len(), 1);
    }

    #[test]
    fn test_grouping_is_transitive() {
        // a~b and b~c at 45° steps, a and c are 90° apart.
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let g = grouper(&[(1, [1.0, 0.0]), (2, [s, s]), (3, [0.0, 1.0])]);
        // 45° distance ≈ 0.293; threshold 0.15 → 0.30.
        let groups = g.find_groups(0.15).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].image_ids, vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn test_groups_are_disjoint_and_ordered() {
        let g = grouper(&[
            (10, [1.0, 0.0]),
            (4, [1.0, 0.0]),
            (7, [-1.0, 0.0]),
            (2, [-1.0, 0.0]),
            (5, [0.0, 1.0]),
        ]);
        let groups = g.find_groups(0.01).unwrap();
        assert_eq!(
            groups,
            vec![
                DuplicateGroup { image_ids: vec![id(2), id(7)] },
                DuplicateGroup { image_ids: vec![id(4), id(10)] },
            ]
        );
    }

    #[test]
    fn test_singletons_dropped() {
        let g = grouper(&[(1, [1.0, 0.0])]);
        assert!(g.find_groups(1.0).unwrap().is_empty());
    }

    #[test]
    fn test_threshold_one_groups_everything() {
        let g = grouper(&[(1, [1.0, 0.0]), (2, [-1.0, 0.0]), (3, [0.0, 1.0])]);
        let groups = g.find_groups(1.0).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].image_ids.len(), 3);
    }
}
