//! Semantic duplicate detection.
//!
//! A nearest-neighbor index over question embeddings, an LRU cache keyed
//! by text hash so unchanged text never re-embeds, and cluster bookkeeping
//! with cross-source representative election. Single writer (the AI
//! processor); readers take snapshots.

pub mod cache;
pub mod cluster;
pub mod index;

pub use cache::EmbeddingCache;
pub use cluster::{ClusterStore, DedupOutcome, DuplicateDetector};
pub use index::{EmbeddingIndex, Neighbor};
