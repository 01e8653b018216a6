//! Embedded graph storage (spec.md §4.3): a `GraphStore` trait over nodes,
//! edges, BM25 text resolution and the snapshot ETag lifecycle, backed by
//! `sled` in production and an in-memory map in dev mode / tests.

pub mod bm25;
pub mod graph;
pub mod kv;

pub use graph::{BackendGraphStore, GraphStore, MemoryGraphStore, SledGraphStore};
pub use kv::{MemoryStorage, SledStorage, StorageBackend, StorageError, StorageManager};
