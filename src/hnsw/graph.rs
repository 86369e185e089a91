//! HNSW graph state and configuration.
//!
//! [`IndexConfig`] defines tuning parameters (M, ef_construction, ef_search,
//! distance metric, layer scale, seed). [`HnswState`] owns the row-keyed node
//! map, the entry point, and the seeded random stream, and maintains the
//! bidirectional edge lists.

use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::metric::DistanceMetric;
use crate::hnsw::RowId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration parameters for an HNSW index.
///
/// Controls the trade-off between build speed, search speed, recall, and
/// memory usage. Zeroed fields are resolved by [`normalized`](Self::normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Distance function for similarity computation.
    pub metric: DistanceMetric,
    /// Number of bidirectional links per node on layers above 0.
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`; 0 = derive).
    pub m_max0: usize,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Candidate list size during search (0 = derive; higher = better recall, slower).
    pub ef_search: usize,
    /// Layer-sampling scale; controls the expected number of layers.
    pub level_scale: f64,
    /// Vector dimension. 0 until the first non-empty insert fixes it.
    pub dimension: usize,
    /// Seed for the per-index random stream.
    pub seed: u64,
}

impl IndexConfig {
    /// Creates a configuration with the library defaults for the given metric.
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_M * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_MIN_EF_SEARCH.max(8 * config::HNSW_DEFAULT_M),
            level_scale: config::HNSW_LEVEL_SCALE,
            dimension: 0,
            seed: config::HNSW_DEFAULT_SEED,
        }
    }

    /// Resolves zeroed fields to their derived defaults.
    ///
    /// `m == 0` becomes the library default, `m_max0 == 0` becomes `2 * m`,
    /// `ef_search == 0` becomes `max(64, 8 * m)`, and a non-positive
    /// `level_scale` falls back to `1 / ln 2`.
    pub fn normalized(mut self) -> Self {
        if self.m == 0 {
            self.m = config::HNSW_DEFAULT_M;
        }
        if self.m_max0 == 0 {
            self.m_max0 = self.m * 2;
        }
        if self.ef_construction == 0 {
            self.ef_construction = config::HNSW_DEFAULT_EF_CONSTRUCTION;
        }
        if self.ef_search == 0 {
            self.ef_search = config::HNSW_MIN_EF_SEARCH.max(8 * self.m);
        }
        if self.level_scale <= 0.0 {
            self.level_scale = config::HNSW_LEVEL_SCALE;
        }
        self
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::new(DistanceMetric::Euclidean)
    }
}

/// One indexed vector and its per-layer neighbour lists.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// External row id of this node.
    pub row: RowId,
    /// The indexed vector; its length equals the index dimension.
    pub vector: Vec<f64>,
    /// Highest layer this node appears on.
    pub top_layer: i32,
    /// Neighbour row ids per layer, `neighbors[layer]` for layer in `0..=top_layer`.
    pub neighbors: Vec<Vec<RowId>>,
}

/// Mutable HNSW graph state, guarded by the index lock.
///
/// All mutation happens while a writer holds the exclusive lock; the random
/// stream shares that discipline because layer sampling advances it.
#[derive(Debug)]
pub struct HnswState {
    pub(crate) config: IndexConfig,
    pub(crate) nodes: HashMap<RowId, Node>,
    pub(crate) entry_row: Option<RowId>,
    pub(crate) entry_layer: i32,
    pub(crate) rng: StdRng,
}

impl HnswState {
    /// Creates an empty graph with the given (already normalized) configuration.
    pub(crate) fn new(config: IndexConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            nodes: HashMap::new(),
            entry_row: None,
            entry_layer: -1,
            rng,
        }
    }

    /// Rebuilds a graph from deserialized parts. The random stream restarts
    /// from the configured seed.
    pub(crate) fn from_parts(
        config: IndexConfig,
        nodes: HashMap<RowId, Node>,
        entry_row: Option<RowId>,
        entry_layer: i32,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            nodes,
            entry_row,
            entry_layer,
            rng,
        }
    }

    #[inline]
    pub(crate) fn node(&self, row: RowId) -> Option<&Node> {
        self.nodes.get(&row)
    }

    #[inline]
    pub(crate) fn contains(&self, row: RowId) -> bool {
        self.nodes.contains_key(&row)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fixes the dimension on first use, then enforces it.
    pub(crate) fn check_dimension(&mut self, len: usize) -> Result<()> {
        if self.config.dimension == 0 {
            self.config.dimension = len;
            Ok(())
        } else if len != self.config.dimension {
            Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                got: len,
            })
        } else {
            Ok(())
        }
    }

    /// Sample the top layer for a new node from the geometric distribution,
    /// capped so worst-case graph height stays bounded.
    pub(crate) fn select_layer(&mut self) -> i32 {
        let u: f64 = self.rng.gen();
        let level = -u.ln() * self.config.level_scale;
        level.min(config::HNSW_MAX_LAYER as f64) as i32
    }

    /// Stores a fresh node with empty neighbour lists for every layer it
    /// appears on.
    pub(crate) fn store_node(&mut self, row: RowId, vector: Vec<f64>, top_layer: i32) {
        let node = Node {
            row,
            vector,
            top_layer,
            neighbors: vec![Vec::new(); (top_layer + 1) as usize],
        };
        self.nodes.insert(row, node);
    }

    pub(crate) fn set_entry(&mut self, row: Option<RowId>, layer: i32) {
        self.entry_row = row;
        self.entry_layer = layer;
    }

    /// Re-elects the entry point as the node with the maximum top layer,
    /// or clears it when the graph is empty.
    pub(crate) fn elect_entry(&mut self) {
        let mut best: Option<(RowId, i32)> = None;
        for node in self.nodes.values() {
            if best.map_or(true, |(_, layer)| node.top_layer > layer) {
                best = Some((node.row, node.top_layer));
            }
        }
        match best {
            Some((row, layer)) => self.set_entry(Some(row), layer),
            None => self.set_entry(None, -1),
        }
    }

    /// Adds the undirected edge `(a, b)` on `layer`.
    ///
    /// The edge is dropped when either endpoint is missing or does not appear
    /// on `layer`: a node keeps exactly one list per layer in `0..=top_layer`.
    /// Endpoint lists are grown lazily so indexing up to a node's top layer is
    /// always legal; duplicates and self-loops are never created.
    pub(crate) fn connect(&mut self, a: RowId, b: RowId, layer: i32) {
        if a == b {
            return;
        }
        let on_layer =
            |node: Option<&Node>| node.map_or(false, |n| layer <= n.top_layer);
        if !on_layer(self.nodes.get(&a)) || !on_layer(self.nodes.get(&b)) {
            return;
        }
        let l = layer as usize;
        if let Some(node) = self.nodes.get_mut(&a) {
            if node.neighbors.len() <= l {
                node.neighbors.resize_with(l + 1, Vec::new);
            }
            if !node.neighbors[l].contains(&b) {
                node.neighbors[l].push(b);
            }
        }
        if let Some(node) = self.nodes.get_mut(&b) {
            if node.neighbors.len() <= l {
                node.neighbors.resize_with(l + 1, Vec::new);
            }
            if !node.neighbors[l].contains(&a) {
                node.neighbors[l].push(a);
            }
        }
    }

    /// Removes the undirected edge `(a, b)` on `layer` in both directions.
    pub(crate) fn disconnect(&mut self, a: RowId, b: RowId, layer: i32) {
        let l = layer as usize;
        if let Some(node) = self.nodes.get_mut(&a) {
            if let Some(list) = node.neighbors.get_mut(l) {
                list.retain(|&n| n != b);
            }
        }
        if let Some(node) = self.nodes.get_mut(&b) {
            if let Some(list) = node.neighbors.get_mut(l) {
                list.retain(|&n| n != a);
            }
        }
    }
}
