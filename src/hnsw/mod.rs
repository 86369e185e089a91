//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! The graph is keyed by host-assigned row ids: every node owns its `f64`
//! vector and one neighbour list per layer it appears on. Upper layers hold
//! exponentially fewer nodes and provide long-range navigation; layer 0 holds
//! every node. Searches descend from a single entry point on the topmost
//! occupied layer.
//!
//! [`VectorIndex`] wraps the graph in a reader/writer lock and persists a
//! fresh storage tree after every mutation, so shared readers and exclusive
//! writers both observe a committed, reopenable state.

/// HNSW graph state: nodes, entry point, bidirectional edges, layer sampling.
pub mod graph;
/// Thread-safe index handle: mutations, queries, metrics, verification.
pub mod index;
/// Insertion plumbing: neighbour selection heuristics and degree pruning.
pub mod insert;
/// Distance metrics: euclidean, cosine, and dot product.
pub mod metric;
/// Greedy layer search over the proximity graph.
pub mod search;

pub use graph::{IndexConfig, Node};
pub use index::{IndexMetrics, IndexStats, MetricsSnapshot, VectorIndex};
pub use metric::DistanceMetric;

/// Stable external row identifier supplied by the host.
///
/// The index interprets row ids only through equality and hashing.
pub type RowId = i64;

/// Seam through which the index pulls stored vectors from the host.
///
/// The returned sequence may be empty (the row's vector column has not been
/// populated yet); the index treats an empty pull as "nothing to index".
/// The index never writes back through this seam and caches vectors only
/// inside its own nodes.
pub trait VectorSource {
    /// Fetch the vector stored for `row`, or an empty vector if none exists.
    fn vector(&self, row: RowId) -> Vec<f64>;
}

impl VectorSource for std::collections::HashMap<RowId, Vec<f64>> {
    fn vector(&self, row: RowId) -> Vec<f64> {
        self.get(&row).cloned().unwrap_or_default()
    }
}
