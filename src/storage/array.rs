//! The host's array-of-references storage tree.
//!
//! A persistent index image is a tree whose interior nodes are arrays of
//! references and whose leaves are arrays of signed 64-bit integers.
//! [`StorageHandle`] is the slot the host supplies for an index's root:
//! the index builds a complete replacement tree first and swaps it in with a
//! single assignment, so an interrupted save never disturbs the previously
//! committed root.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One array in the storage tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredArray {
    /// Leaf: signed 64-bit integers (doubles are bit-cast in and out).
    Ints(Vec<i64>),
    /// Interior: references to child arrays.
    Refs(Vec<StoredArray>),
}

impl StoredArray {
    /// Returns the integer payload of a leaf, or `None` for an interior array.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            StoredArray::Ints(values) => Some(values),
            StoredArray::Refs(_) => None,
        }
    }

    /// Returns the children of an interior array, or `None` for a leaf.
    pub fn as_refs(&self) -> Option<&[StoredArray]> {
        match self {
            StoredArray::Ints(_) => None,
            StoredArray::Refs(children) => Some(children),
        }
    }
}

/// Cloneable handle to the host-owned root slot of one index.
///
/// Clones share the slot, so a handle kept by the host observes every root
/// the index commits.
#[derive(Debug, Clone, Default)]
pub struct StorageHandle {
    slot: Arc<Mutex<Option<StoredArray>>>,
}

impl StorageHandle {
    /// Creates a handle with an empty slot (no committed root yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle whose slot already holds a committed root.
    pub fn with_root(root: StoredArray) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(root))),
        }
    }

    /// Replaces the committed root with a fully built new tree.
    /// The old root is released only after the new one is in place.
    pub fn install(&self, root: StoredArray) {
        *self.slot.lock() = Some(root);
    }

    /// Clones the currently committed root, if any.
    pub fn snapshot(&self) -> Option<StoredArray> {
        self.slot.lock().clone()
    }

    /// Whether a root has been committed.
    pub fn is_committed(&self) -> bool {
        self.slot.lock().is_some()
    }
}
