//! Thread-safe index handle.
//!
//! [`VectorIndex`] guards the graph with a single reader/writer lock: queries,
//! stats, and verification take the shared mode, every mutation takes the
//! exclusive mode. Each mutation commits a freshly built storage tree into the
//! host-provided [`StorageHandle`] before the exclusive section ends, so
//! readers and reopeners always observe a complete image. Operation counters
//! and accumulated times are relaxed atomics recorded after the guard drops.

use crate::error::{IndexError, Result};
use crate::hnsw::graph::{HnswState, IndexConfig};
use crate::hnsw::{search, RowId, VectorSource};
use crate::storage::array::StorageHandle;
use crate::storage::persistence;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time index statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of indexed vectors.
    pub num_vectors: usize,
    /// Layer of the entry point, or -1 when the index is empty.
    pub max_layer: i32,
}

/// Monotonic operation counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    insert_count: AtomicU64,
    erase_count: AtomicU64,
    search_count: AtomicU64,
    radius_search_count: AtomicU64,
    total_insert_ns: AtomicU64,
    total_search_ns: AtomicU64,
    total_radius_search_ns: AtomicU64,
}

impl IndexMetrics {
    fn record_inserts(&self, count: u64, elapsed: Duration) {
        self.insert_count.fetch_add(count, Ordering::Relaxed);
        self.total_insert_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    fn record_erase(&self) {
        self.erase_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_search(&self, elapsed: Duration) {
        self.search_count.fetch_add(1, Ordering::Relaxed);
        self.total_search_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    fn record_radius_search(&self, elapsed: Duration) {
        self.radius_search_count.fetch_add(1, Ordering::Relaxed);
        self.total_radius_search_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn insert_count(&self) -> u64 {
        self.insert_count.load(Ordering::Relaxed)
    }

    pub fn erase_count(&self) -> u64 {
        self.erase_count.load(Ordering::Relaxed)
    }

    pub fn search_count(&self) -> u64 {
        self.search_count.load(Ordering::Relaxed)
    }

    pub fn radius_search_count(&self) -> u64 {
        self.radius_search_count.load(Ordering::Relaxed)
    }

    /// Average insert latency in milliseconds, 0 before the first insert.
    pub fn avg_insert_ms(&self) -> f64 {
        Self::avg_ms(self.total_insert_ns.load(Ordering::Relaxed), self.insert_count())
    }

    /// Average k-NN search latency in milliseconds.
    pub fn avg_search_ms(&self) -> f64 {
        Self::avg_ms(self.total_search_ns.load(Ordering::Relaxed), self.search_count())
    }

    /// Average radius search latency in milliseconds.
    pub fn avg_radius_search_ms(&self) -> f64 {
        Self::avg_ms(
            self.total_radius_search_ns.load(Ordering::Relaxed),
            self.radius_search_count(),
        )
    }

    fn avg_ms(total_ns: u64, count: u64) -> f64 {
        if count == 0 {
            0.0
        } else {
            (total_ns as f64 / 1e6) / count as f64
        }
    }

    /// Copies all counters and averages into a plain value.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inserts: self.insert_count(),
            erases: self.erase_count(),
            searches: self.search_count(),
            radius_searches: self.radius_search_count(),
            avg_insert_ms: self.avg_insert_ms(),
            avg_search_ms: self.avg_search_ms(),
            avg_radius_search_ms: self.avg_radius_search_ms(),
        }
    }
}

/// Plain copy of the metrics counters and computed averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub inserts: u64,
    pub erases: u64,
    pub searches: u64,
    pub radius_searches: u64,
    pub avg_insert_ms: f64,
    pub avg_search_ms: f64,
    pub avg_radius_search_ms: f64,
}

/// A persistent, concurrent HNSW index over one vector column.
#[derive(Debug)]
pub struct VectorIndex {
    state: RwLock<HnswState>,
    storage: StorageHandle,
    metrics: IndexMetrics,
}

impl VectorIndex {
    /// Creates an empty index that will persist into `storage`.
    pub fn create(config: IndexConfig, storage: StorageHandle) -> Self {
        Self {
            state: RwLock::new(HnswState::new(config.normalized())),
            storage,
            metrics: IndexMetrics::default(),
        }
    }

    /// Opens an index from the root committed in `storage`, or creates an
    /// empty one when nothing has been committed yet.
    ///
    /// The stored metadata restores `m`, `ef_construction`, `ef_search`, and
    /// the dimension. `metric`, `m_max0`, `level_scale`, and `seed` are taken
    /// from `config`; that is the set of parameters a caller may retune on reopen.
    /// Reopening with a different metric keeps the graph built under the old
    /// one; rebuild explicitly after such a change.
    pub fn open(config: IndexConfig, storage: StorageHandle) -> Result<Self> {
        let config = config.normalized();
        let state = match storage.snapshot() {
            Some(root) => persistence::decode_index(&root, config)?,
            None => HnswState::new(config),
        };
        Ok(Self {
            state: RwLock::new(state),
            storage,
            metrics: IndexMetrics::default(),
        })
    }

    /// The handle this index commits its persistent roots into.
    pub fn storage(&self) -> StorageHandle {
        self.storage.clone()
    }

    /// Per-operation counters.
    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> IndexConfig {
        self.state.read().config.clone()
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// Whether no vectors are indexed.
    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// The fixed vector dimension, or 0 before the first non-empty insert.
    pub fn dimension(&self) -> usize {
        self.state.read().config.dimension
    }

    /// Vector count and topmost occupied layer.
    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            num_vectors: state.len(),
            max_layer: state.entry_layer,
        }
    }

    /// Replaces the search-time beam width.
    pub fn set_ef_search(&self, ef_search: usize) {
        let mut state = self.state.write();
        state.config.ef_search = ef_search;
    }

    /// Indexes the vector the host stores for `row`.
    ///
    /// An empty pull is a silent no-op, which lets callers bulk-attach rows
    /// whose vector column has not been populated yet. A row that is already
    /// indexed is replaced. Fails with [`IndexError::DimensionMismatch`]
    /// before any mutation when the vector length disagrees with the index.
    pub fn insert(&self, row: RowId, source: &dyn VectorSource) -> Result<()> {
        let t0 = Instant::now();
        {
            let mut state = self.state.write();
            let vector = source.vector(row);
            if vector.is_empty() {
                return Ok(());
            }
            state.check_dimension(vector.len())?;
            if state.contains(row) {
                state.erase_row(row);
            }
            state.insert_vector(row, vector);
            self.commit(&state);
        }
        self.metrics.record_inserts(1, t0.elapsed());
        Ok(())
    }

    /// Indexes many rows under one exclusive section with a single
    /// persistence pass. Rows with empty vectors are skipped; the first
    /// dimension mismatch aborts the batch after committing the rows already
    /// applied.
    pub fn insert_bulk(&self, rows: &[RowId], source: &dyn VectorSource) -> Result<usize> {
        let t0 = Instant::now();
        let mut inserted = 0usize;
        let outcome = {
            let mut state = self.state.write();
            let mut outcome = Ok(());
            for &row in rows {
                let vector = source.vector(row);
                if vector.is_empty() {
                    continue;
                }
                if let Err(e) = state.check_dimension(vector.len()) {
                    outcome = Err(e);
                    break;
                }
                if state.contains(row) {
                    state.erase_row(row);
                }
                state.insert_vector(row, vector);
                inserted += 1;
            }
            if inserted > 0 {
                self.commit(&state);
            }
            outcome
        };
        if inserted > 0 {
            self.metrics.record_inserts(inserted as u64, t0.elapsed());
        }
        outcome.map(|_| inserted)
    }

    /// Removes a row from the index. Returns whether it was present.
    pub fn erase(&self, row: RowId) -> bool {
        let existed = {
            let mut state = self.state.write();
            let existed = state.erase_row(row);
            if existed {
                self.commit(&state);
            }
            existed
        };
        if existed {
            self.metrics.record_erase();
        }
        existed
    }

    /// Replaces a row's indexed vector with whatever the host now stores.
    ///
    /// Erase and re-insert run under one exclusive section, so no reader can
    /// observe the index without the row mid-update. Validation happens before
    /// the old node is touched; on error the index is unchanged.
    pub fn set(&self, row: RowId, source: &dyn VectorSource) -> Result<()> {
        let t0 = Instant::now();
        let inserted = {
            let mut state = self.state.write();
            let vector = source.vector(row);
            if !vector.is_empty() {
                state.check_dimension(vector.len())?;
            }
            state.erase_row(row);
            let inserted = if vector.is_empty() {
                false
            } else {
                state.insert_vector(row, vector);
                true
            };
            self.commit(&state);
            inserted
        };
        if inserted {
            self.metrics.record_inserts(1, t0.elapsed());
        }
        Ok(())
    }

    /// Drops every node. The fixed dimension is kept. Idempotent.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.clear_nodes();
        self.commit(&state);
    }

    /// Rebuilds the graph by re-inserting every stored vector.
    ///
    /// Layer assignments are re-sampled, so this is the entry point for
    /// applying changed construction parameters. Expensive; use sparingly.
    pub fn rebuild(&self) {
        let mut state = self.state.write();
        let vectors = state.snapshot_vectors();
        state.clear_nodes();
        for (row, vector) in vectors {
            state.insert_vector(row, vector);
        }
        self.commit(&state);
        tracing::debug!("Rebuilt index with {} vectors", state.len());
    }

    /// Finds the `k` nearest neighbours of `q`, ascending by distance.
    ///
    /// `ef_search` overrides the configured beam width when non-zero. Returns
    /// an empty result for an empty index or `k == 0`; fails with
    /// [`IndexError::DimensionMismatch`] when `|q|` disagrees with the index.
    pub fn search_knn(&self, query: &[f64], k: usize, ef_search: usize) -> Result<Vec<(RowId, f64)>> {
        let t0 = Instant::now();
        let results = {
            let state = self.state.read();
            if state.is_empty() || k == 0 {
                Vec::new()
            } else {
                Self::check_query(&state, query)?;
                search::knn(&state, query, k, ef_search)
            }
        };
        self.metrics.record_search(t0.elapsed());
        Ok(results)
    }

    /// Finds every vector within `max_distance` of `q`, ascending by distance.
    ///
    /// A negative radius yields an empty result rather than an error.
    pub fn search_radius(&self, query: &[f64], max_distance: f64) -> Result<Vec<(RowId, f64)>> {
        let t0 = Instant::now();
        let results = {
            let state = self.state.read();
            if state.is_empty() || max_distance < 0.0 {
                Vec::new()
            } else {
                Self::check_query(&state, query)?;
                let n = state.len();
                let ef = (2 * state.config.ef_search).min(state.config.ef_search.max(n));
                let mut results = search::knn(&state, query, n, ef);
                // Results ascend, so everything after the first miss is out too.
                if let Some(cut) = results.iter().position(|&(_, d)| d > max_distance) {
                    results.truncate(cut);
                }
                results
            }
        };
        self.metrics.record_radius_search(t0.elapsed());
        Ok(results)
    }

    fn check_query(state: &HnswState, query: &[f64]) -> Result<()> {
        if query.len() != state.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: state.config.dimension,
                got: query.len(),
            });
        }
        Ok(())
    }

    /// Asserts graph integrity: every edge has its inverse, no node exceeds
    /// its degree bound by more than the transient slack, and no node lists
    /// itself. Returns a description of the first violation.
    pub fn verify(&self) -> std::result::Result<(), String> {
        let state = self.state.read();
        for node in state.nodes.values() {
            for (layer, list) in node.neighbors.iter().enumerate() {
                let bound = if layer == 0 {
                    state.config.m_max0
                } else {
                    state.config.m
                };
                if list.len() > bound + 2 {
                    return Err(format!(
                        "node {} has degree {} at layer {layer}, bound is {}",
                        node.row,
                        list.len(),
                        bound + 2
                    ));
                }
                for &neighbor in list {
                    if neighbor == node.row {
                        return Err(format!("node {} lists itself at layer {layer}", node.row));
                    }
                    if let Some(peer) = state.nodes.get(&neighbor) {
                        let reciprocal = peer
                            .neighbors
                            .get(layer)
                            .is_some_and(|l| l.contains(&node.row));
                        if !reciprocal {
                            return Err(format!(
                                "edge {} -> {neighbor} at layer {layer} has no inverse",
                                node.row
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds and commits a fresh storage tree for the current state.
    /// Called with the exclusive lock held.
    fn commit(&self, state: &HnswState) {
        let root = persistence::encode_index(state);
        self.storage.install(root);
    }
}
