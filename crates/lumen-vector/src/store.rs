//! In-memory embedding store with brute-force k-nearest-neighbour search.
//!
//! Every query scans all stored vectors. At personal-gallery sizes (tens of
//! thousands of images) a linear scan over 512-d vectors stays in the low
//! milliseconds, so there is no approximate index to build or keep in sync.
//!
//! Vectors are held as `Arc<[f32]>` behind a reader/writer lock. An upsert
//! swaps the whole `Arc`, so a concurrent reader sees either the previous or
//! the new vector, never a partially written one.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};
use uuid::Uuid;

use lumen_core::{defaults, Error, Result, SimilarityResult};

use crate::codec::{decode_embedding_with_dimension, ensure_finite};
use crate::distance::cosine_distance;

/// Heap entry ordered so that the *worst* candidate sits at the top.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    image_id: Uuid,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Larger distance is worse; on ties the larger id is worse.
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.image_id.cmp(&other.image_id))
    }
}

/// Fixed-dimension embedding vectors keyed by image id.
#[derive(Debug)]
pub struct EmbeddingStore {
    dimension: usize,
    vectors: RwLock<HashMap<Uuid, Arc<[f32]>>>,
}

impl Default for EmbeddingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingStore {
    /// Create an empty store for [`defaults::EMBEDDING_DIMENSION`] vectors.
    pub fn new() -> Self {
        Self::with_dimension(defaults::EMBEDDING_DIMENSION)
    }

    /// Create an empty store for vectors of the given dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Arc<[f32]>>> {
        self.vectors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Arc<[f32]>>> {
        self.vectors.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    /// Check that `vector` could be stored: right dimension, finite values.
    pub fn validate(&self, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector.len())?;
        ensure_finite(vector)
    }

    /// Insert or replace the vector for an image.
    pub fn upsert(&self, image_id: Uuid, vector: Vec<f32>) -> Result<()> {
        self.validate(&vector)?;
        let vector: Arc<[f32]> = Arc::from(vector);
        self.write().insert(image_id, vector);
        trace!(subsystem = "vector", component = "embedding_store", op = "upsert", image_id = %image_id);
        Ok(())
    }

    /// Decode a persisted blob and upsert it.
    pub fn upsert_blob(&self, image_id: Uuid, blob: &[u8]) -> Result<()> {
        let vector = decode_embedding_with_dimension(blob, self.dimension)?;
        self.upsert(image_id, vector)
    }

    /// Remove the vector for an image. Returns whether one was present.
    pub fn remove(&self, image_id: Uuid) -> bool {
        self.write().remove(&image_id).is_some()
    }

    /// Get the stored vector for an image.
    pub fn get(&self, image_id: Uuid) -> Option<Arc<[f32]>> {
        self.read().get(&image_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn has_embedding(&self, image_id: Uuid) -> bool {
        self.read().contains_key(&image_id)
    }

    /// All image ids with an embedding, sorted ascending.
    pub fn image_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Consistent copy of every stored vector, sorted by image id.
    pub fn snapshot(&self) -> Vec<(Uuid, Arc<[f32]>)> {
        let mut entries: Vec<(Uuid, Arc<[f32]>)> = self
            .read()
            .iter()
            .map(|(id, v)| (*id, Arc::clone(v)))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Bulk-load persisted blobs.
    ///
    /// Fails on the first corrupt blob without loading anything, so a
    /// partially corrupt table never yields a partially populated store.
    pub fn load_blobs<I>(&self, blobs: I) -> Result<usize>
    where
        I: IntoIterator<Item = (Uuid, Vec<u8>)>,
    {
        let mut decoded = Vec::new();
        for (image_id, blob) in blobs {
            let vector = decode_embedding_with_dimension(&blob, self.dimension)?;
            decoded.push((image_id, Arc::<[f32]>::from(vector)));
        }

        let loaded = decoded.len();
        let mut vectors = self.write();
        vectors.extend(decoded);
        debug!(
            subsystem = "vector",
            component = "embedding_store",
            op = "load",
            loaded,
            total = vectors.len(),
            "Loaded persisted embeddings"
        );
        Ok(loaded)
    }

    /// Return up to `k` stored images closest to `query`, ascending by
    /// distance with ties broken by image id.
    ///
    /// Ids in `exclude` are never returned. The query is validated before
    /// any scanning.
    pub fn find_similar(
        &self,
        query: &[f32],
        k: usize,
        exclude: &[Uuid],
    ) -> Result<Vec<SimilarityResult>> {
        self.validate(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let exclude: HashSet<&Uuid> = exclude.iter().collect();
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k.saturating_add(1));

        {
            let vectors = self.read();
            for (image_id, vector) in vectors.iter() {
                if exclude.contains(image_id) {
                    continue;
                }
                let candidate = Candidate {
                    distance: cosine_distance(query, vector),
                    image_id: *image_id,
                };
                if heap.len() < k {
                    heap.push(candidate);
                } else if let Some(worst) = heap.peek() {
                    if candidate < *worst {
                        heap.pop();
                        heap.push(candidate);
                    }
                }
            }
        }

        let results: Vec<SimilarityResult> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| SimilarityResult {
                image_id: c.image_id,
                distance: c.distance,
            })
            .collect();

        trace!(
            subsystem = "vector",
            component = "embedding_store",
            op = "find_similar",
            k,
            result_count = results.len()
        );
        Ok(results)
    }

    /// Neighbours of an already embedded image, excluding the image itself.
    ///
    /// A stored vector that fails validation is reported as an internal
    /// error: it means persisted data is corrupt, not that the caller erred.
    pub fn find_similar_to(
        &self,
        image_id: Uuid,
        k: usize,
        exclude: &[Uuid],
    ) -> Result<Vec<SimilarityResult>> {
        let query = self
            .get(image_id)
            .ok_or_else(|| Error::NotFound(format!("Embedding for image {}", image_id)))?;

        let mut excluded = Vec::with_capacity(exclude.len() + 1);
        excluded.push(image_id);
        excluded.extend_from_slice(exclude);

        self.find_similar(&query, k, &excluded).map_err(|e| match e {
            Error::DimensionMismatch { .. }
            | Error::CorruptEmbedding { .. }
            | Error::InvalidInput(_) => Error::Internal(
                format!("Stored embedding for image {} is corrupt: {}", image_id, e),
            ),
            other => other,
        })
    }
}
