//! Approximate nearest neighbor search over caption embeddings.
//!
//! The primary implementation uses [`hnsw_rs`] (pure Rust).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │   redb EMBEDDINGS_TABLE          │  source of truth
//! └──────────┬───────────────────────┘
//!            │ load(): rebuild_from_embeddings
//!    ┌───────┴────────┐
//!    │   HnswIndex    │  derived, in memory
//!    └────────────────┘
//! ```
//!
//! Embeddings stored in redb are the **source of truth**. The HNSW index
//! is a derived, rebuildable structure and is never written to disk.

mod hnsw;

pub use hnsw::HnswIndex;
