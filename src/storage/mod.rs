//! Storage layer: the host array tree, index serialization, and snapshot files.

/// Host array tree: integer-array leaves, reference-array interior nodes, and
/// the root slot an index persists into.
pub mod array;
/// Index serialization (format version 1) and column snapshot files.
pub mod persistence;

pub use array::{StorageHandle, StoredArray};
