//! Greedy layer search over the HNSW graph.
//!
//! [`search_layer`] runs the beam search on one layer; [`knn`] strings the
//! layers together for a full top-down query. Rows referenced by a neighbour
//! list but missing from the node map are skipped silently: they can only
//! reflect a transient gap across an erase/insert boundary and must not abort
//! a query.

use crate::hnsw::graph::HnswState;
use crate::hnsw::RowId;
use ordered_float::OrderedFloat;
use std::collections::{BinaryHeap, HashSet};

/// A frontier entry: (negative distance, row id).
/// `BinaryHeap` is a max-heap; negating the distance yields min-heap behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f64>,
    row: RowId,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A result entry: (distance, row id). Max-heap by distance for pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f64>,
    row: RowId,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Search a single layer of the graph, starting from one seed row.
///
/// Maintains a frontier min-heap of rows to expand and a result max-heap
/// bounded at `ef` entries. Expansion stops once the nearest unexpanded row is
/// farther than the worst retained result and the result set is full.
///
/// Returns up to `ef` `(row, distance)` pairs sorted by ascending distance.
pub(crate) fn search_layer(
    state: &HnswState,
    query: &[f64],
    entry: RowId,
    ef: usize,
    layer: i32,
) -> Vec<(RowId, f64)> {
    let Some(entry_node) = state.node(entry) else {
        return Vec::new();
    };
    let metric = state.config.metric;

    let mut visited: HashSet<RowId> = HashSet::new();
    let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);

    let entry_dist = metric.distance(query, &entry_node.vector);
    visited.insert(entry);
    frontier.push(Candidate {
        neg_distance: OrderedFloat(-entry_dist),
        row: entry,
    });
    results.push(ResultEntry {
        distance: OrderedFloat(entry_dist),
        row: entry,
    });

    while let Some(candidate) = frontier.pop() {
        let c_dist = -candidate.neg_distance.0;

        // The nearest unexpanded row cannot improve a full result set.
        if results.len() >= ef && c_dist > results.peek().map_or(f64::MAX, |r| r.distance.0) {
            break;
        }

        let Some(node) = state.node(candidate.row) else {
            continue;
        };
        let l = layer as usize;
        if l >= node.neighbors.len() {
            continue;
        }

        for &neighbor in &node.neighbors[l] {
            if !visited.insert(neighbor) {
                continue;
            }
            let Some(neighbor_node) = state.node(neighbor) else {
                continue;
            };
            let dist = metric.distance(query, &neighbor_node.vector);
            let worst = results.peek().map_or(f64::MAX, |r| r.distance.0);
            if dist < worst || results.len() < ef {
                frontier.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    row: neighbor,
                });
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    row: neighbor,
                });
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.row, r.distance.0))
        .collect()
}

/// Multi-layer k-nearest-neighbour search.
///
/// Assumes a non-empty graph and a dimension-checked query. The effective
/// beam width is `max(ef_override, k)`, or `max(ef_search, k)` when the
/// override is zero, clamped (together with `k`) to the node count.
pub(crate) fn knn(state: &HnswState, query: &[f64], k: usize, ef_override: usize) -> Vec<(RowId, f64)> {
    let Some(mut current) = state.entry_row else {
        return Vec::new();
    };

    let n = state.len();
    let mut ef = if ef_override == 0 {
        state.config.ef_search.max(k)
    } else {
        ef_override.max(k)
    };
    ef = ef.min(n);
    let k = k.min(n);

    // Descend the upper layers greedily, carrying the nearest row forward.
    let mut layer = state.entry_layer;
    while layer > 0 {
        if let Some(&(nearest, _)) = search_layer(state, query, current, 1, layer).first() {
            current = nearest;
        }
        layer -= 1;
    }

    let mut results = search_layer(state, query, current, ef, 0);
    results.truncate(k);
    results
}
