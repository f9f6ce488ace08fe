//! # lumen-vector
//!
//! Vector similarity engine for lumen.
//!
//! This crate provides:
//! - [`EmbeddingStore`]: fixed-dimension vectors keyed by image id with
//!   brute-force k-nearest-neighbour search
//! - [`DuplicateGrouper`]: union-find clustering of near-identical images
//! - The little-endian `f32` blob codec used to persist embeddings
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use lumen_vector::{DuplicateGrouper, EmbeddingStore};
//! use uuid::Uuid;
//!
//! let store = Arc::new(EmbeddingStore::with_dimension(2));
//! store.upsert(Uuid::from_u128(1), vec![1.0, 0.0]).unwrap();
//! store.upsert(Uuid::from_u128(2), vec![1.0, 0.0]).unwrap();
//!
//! let nearest = store.find_similar(&[1.0, 0.0], 1, &[]).unwrap();
//! assert_eq!(nearest.len(), 1);
//!
//! let groups = DuplicateGrouper::new(store).find_groups(0.05).unwrap();
//! assert_eq!(groups.len(), 1);
//! ```

pub mod codec;
pub mod distance;
pub mod duplicates;
pub mod store;

pub use codec::{
    decode_embedding, decode_embedding_with_dimension, encode_embedding, ensure_finite,
};
pub use distance::cosine_distance;
pub use duplicates::{effective_distance, DuplicateGrouper};
pub use store::EmbeddingStore;
