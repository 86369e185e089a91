//! # vicinity
//!
//! Embeddable persistent HNSW (Hierarchical Navigable Small World) vector
//! index for columns of `f64` vectors.
//!
//! The engine answers approximate k-nearest-neighbour and radius queries,
//! supports incremental insertion, update, and deletion, and survives process
//! restarts by serializing the graph into a host-provided tree of integer
//! arrays. Concurrency follows a readers-parallel / writer-exclusive
//! discipline; per-operation metrics are kept in relaxed atomics.
//!
//! This is a core library crate with zero async dependencies, suitable for
//! embedding directly in a host database or behind language bindings.

/// Global configuration constants: defaults, caps, and tuning parameters.
pub mod config;
/// Host database stand-in: named vector columns with optional indexes.
pub mod database;
/// Library error type and `Result` alias.
pub mod error;
/// HNSW approximate nearest neighbor index: graph structure, search, insertion, and distance metrics.
pub mod hnsw;
/// Storage layer: the host array tree, index serialization, and snapshot files.
pub mod storage;
