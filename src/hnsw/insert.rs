//! HNSW insertion and removal.
//!
//! New nodes descend from the entry point to their sampled layer, then connect
//! on every layer they appear on: candidates come from a beam search with
//! `ef_construction`, neighbours are chosen by simple selection at layer 0 and
//! by the diversity-preserving heuristic above, and every touched neighbour is
//! pruned back to its degree bound afterwards.

use crate::hnsw::graph::HnswState;
use crate::hnsw::search::search_layer;
use crate::hnsw::RowId;
use std::collections::HashSet;

/// Take the first `m` candidates of an ascending candidate list.
pub(crate) fn select_neighbors_simple(candidates: &[(RowId, f64)], m: usize) -> Vec<RowId> {
    candidates.iter().take(m).map(|&(row, _)| row).collect()
}

/// Diversity-preserving neighbour selection.
///
/// Walks the candidates in ascending pivot distance and admits one only if it
/// is at least as close to the pivot as to every already-admitted neighbour,
/// which spreads edges across directions instead of clustering them.
///
/// With `extend_candidates` the working set is first widened with the
/// layer-local neighbours of every candidate (pivot distances recomputed) and
/// re-sorted. The extension checks distance to the pivot only; it does not
/// revisit the diversity condition for rows pulled in this way.
pub(crate) fn select_neighbors_heuristic(
    state: &HnswState,
    pivot: &[f64],
    candidates: &[(RowId, f64)],
    m: usize,
    layer: i32,
    extend_candidates: bool,
) -> Vec<RowId> {
    let metric = state.config.metric;
    let mut working: Vec<(RowId, f64)> = candidates.to_vec();

    if extend_candidates {
        let mut seen: HashSet<RowId> = candidates.iter().map(|&(row, _)| row).collect();
        for &(row, _) in candidates {
            let Some(node) = state.node(row) else {
                continue;
            };
            let Some(list) = node.neighbors.get(layer as usize) else {
                continue;
            };
            for &neighbor in list {
                if seen.contains(&neighbor) {
                    continue;
                }
                if let Some(neighbor_node) = state.node(neighbor) {
                    working.push((neighbor, metric.distance(pivot, &neighbor_node.vector)));
                    seen.insert(neighbor);
                }
            }
        }
        working.sort_by(|a, b| a.1.total_cmp(&b.1));
    }

    let mut selected: Vec<RowId> = Vec::with_capacity(m);
    for &(candidate, dist_to_pivot) in &working {
        if selected.len() >= m {
            break;
        }
        let Some(candidate_node) = state.node(candidate) else {
            continue;
        };
        let diverse = selected.iter().all(|&other| match state.node(other) {
            Some(other_node) => {
                metric.distance(&candidate_node.vector, &other_node.vector) >= dist_to_pivot
            }
            None => true,
        });
        if diverse {
            selected.push(candidate);
        }
    }
    selected
}

impl HnswState {
    /// Inserts a dimension-checked, non-empty vector under a row id that is
    /// not currently present.
    pub(crate) fn insert_vector(&mut self, row: RowId, vector: Vec<f64>) {
        let node_layer = self.select_layer();

        if self.is_empty() {
            self.store_node(row, vector, node_layer);
            self.set_entry(Some(row), node_layer);
            return;
        }

        let query = vector.clone();
        let Some(mut current) = self.entry_row else {
            return;
        };

        // Descend layers above the new node's level, carrying the nearest row.
        let mut layer = self.entry_layer;
        while layer > node_layer {
            if let Some(&(nearest, _)) = search_layer(self, &query, current, 1, layer).first() {
                current = nearest;
            }
            layer -= 1;
        }

        self.store_node(row, vector, node_layer);

        let ef = self.config.ef_construction;
        for layer in (0..=node_layer).rev() {
            let candidates = search_layer(self, &query, current, ef, layer);
            let m_max = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };

            let selected = if layer == 0 {
                select_neighbors_simple(&candidates, m_max)
            } else {
                select_neighbors_heuristic(self, &query, &candidates, m_max, layer, true)
            };

            for &neighbor in &selected {
                self.connect(row, neighbor, layer);
            }
            for &neighbor in &selected {
                self.prune_connections(neighbor, layer);
            }

            if let Some(&(nearest, _)) = candidates.first() {
                current = nearest;
            }
        }

        if node_layer > self.entry_layer {
            self.set_entry(Some(row), node_layer);
        }
    }

    /// Reselects a node's neighbours on `layer` when its degree exceeds the
    /// bound, disconnecting every evicted incumbent in both directions.
    pub(crate) fn prune_connections(&mut self, row: RowId, layer: i32) {
        let l = layer as usize;
        let (pivot, current) = match self.node(row) {
            Some(node) if l < node.neighbors.len() => {
                (node.vector.clone(), node.neighbors[l].clone())
            }
            _ => return,
        };
        let m_max = if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        };
        if current.len() <= m_max {
            return;
        }

        let mut candidates: Vec<(RowId, f64)> = current
            .iter()
            .filter_map(|&neighbor| {
                self.nodes
                    .get(&neighbor)
                    .map(|node| (neighbor, self.config.metric.distance(&pivot, &node.vector)))
            })
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

        let keep = select_neighbors_heuristic(self, &pivot, &candidates, m_max, layer, false);
        for &old in &current {
            if !keep.contains(&old) {
                self.disconnect(row, old, layer);
            }
        }
        if let Some(node) = self.nodes.get_mut(&row) {
            node.neighbors[l] = keep;
        }
    }

    /// Removes a row and its edges, re-electing the entry point when the
    /// erased row held it. Returns whether the row existed.
    pub(crate) fn erase_row(&mut self, row: RowId) -> bool {
        let Some(node) = self.nodes.get(&row) else {
            return false;
        };
        let lists = node.neighbors.clone();
        for (layer, list) in lists.iter().enumerate() {
            for &neighbor in list {
                self.disconnect(row, neighbor, layer as i32);
            }
        }
        self.nodes.remove(&row);
        if self.entry_row == Some(row) {
            self.elect_entry();
        }
        true
    }

    /// Drops every node and clears the entry point. The fixed dimension and
    /// the random stream are kept.
    pub(crate) fn clear_nodes(&mut self) {
        self.nodes.clear();
        self.set_entry(None, -1);
    }

    /// Snapshot of all `(row, vector)` pairs, for rebuilds.
    pub(crate) fn snapshot_vectors(&self) -> Vec<(RowId, Vec<f64>)> {
        let mut vectors: Vec<(RowId, Vec<f64>)> = self
            .nodes
            .values()
            .map(|node| (node.row, node.vector.clone()))
            .collect();
        vectors.sort_unstable_by_key(|&(row, _)| row);
        vectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::IndexConfig;
    use crate::hnsw::metric::DistanceMetric;

    fn state_with_points(points: &[(RowId, Vec<f64>)]) -> HnswState {
        let mut state = HnswState::new(IndexConfig::default().normalized());
        state.config.dimension = points.first().map_or(0, |(_, v)| v.len());
        for (row, vector) in points {
            state.store_node(*row, vector.clone(), 0);
        }
        state
    }

    #[test]
    fn test_simple_selection_takes_prefix() {
        let candidates = vec![(5, 0.5), (2, 1.0), (9, 2.0)];
        assert_eq!(select_neighbors_simple(&candidates, 2), vec![5, 2]);
        assert_eq!(select_neighbors_simple(&candidates, 10), vec![5, 2, 9]);
        assert!(select_neighbors_simple(&candidates, 0).is_empty());
    }

    #[test]
    fn test_heuristic_prefers_diverse_directions() {
        // Pivot at the origin; two candidates clustered east, one north.
        let state = state_with_points(&[
            (1, vec![1.0, 0.0]),
            (2, vec![1.2, 0.0]),
            (3, vec![0.0, 1.5]),
        ]);
        let pivot = [0.0, 0.0];
        let candidates = vec![(1, 1.0), (2, 1.2), (3, 1.5)];
        let selected = select_neighbors_heuristic(&state, &pivot, &candidates, 3, 0, false);
        // Candidate 2 sits closer to 1 (0.2) than to the pivot (1.2): rejected.
        assert_eq!(selected, vec![1, 3]);
    }

    #[test]
    fn test_heuristic_collinear_admits_closest_only() {
        let state = state_with_points(&[(1, vec![1.0]), (2, vec![2.0]), (3, vec![10.0])]);
        let candidates = vec![(1, 1.0), (2, 2.0), (3, 10.0)];
        let selected = select_neighbors_heuristic(&state, &[0.0], &candidates, 3, 0, false);
        assert_eq!(selected, vec![1]);
    }

    #[test]
    fn test_heuristic_stops_at_m() {
        let state = state_with_points(&[
            (1, vec![1.0, 0.0]),
            (2, vec![0.0, 1.0]),
            (3, vec![-1.0, 0.0]),
            (4, vec![0.0, -1.0]),
        ]);
        let candidates = vec![(1, 1.0), (2, 1.0), (3, 1.0), (4, 1.0)];
        let selected =
            select_neighbors_heuristic(&state, &[0.0, 0.0], &candidates, 2, 0, false);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_heuristic_extension_pulls_in_neighbors() {
        let mut state = state_with_points(&[
            (1, vec![3.0]),
            (2, vec![9.0]),
            (3, vec![0.5]),
        ]);
        // Row 3 is nearest the pivot but only reachable as a neighbour of 1.
        state.connect(1, 3, 0);
        let candidates = vec![(1, 3.0), (2, 9.0)];
        let selected = select_neighbors_heuristic(&state, &[0.0], &candidates, 3, 0, true);
        assert_eq!(selected[0], 3, "extension should surface the closer row");
    }

    #[test]
    fn test_heuristic_skips_missing_candidate() {
        let state = state_with_points(&[(1, vec![1.0])]);
        let candidates = vec![(42, 0.5), (1, 1.0)];
        let selected = select_neighbors_heuristic(&state, &[0.0], &candidates, 2, 0, false);
        assert_eq!(selected, vec![1]);
    }

    #[test]
    fn test_insert_first_node_becomes_entry() {
        let mut state = HnswState::new(IndexConfig::default().normalized());
        state.config.dimension = 2;
        state.insert_vector(7, vec![1.0, 2.0]);
        assert_eq!(state.len(), 1);
        assert_eq!(state.entry_row, Some(7));
        assert_eq!(state.entry_layer, state.node(7).unwrap().top_layer);
    }

    #[test]
    fn test_insert_connects_to_existing_graph() {
        let mut state = HnswState::new(IndexConfig::default().normalized());
        state.config.dimension = 1;
        for i in 0..20 {
            state.insert_vector(i, vec![i as f64]);
        }
        assert_eq!(state.len(), 20);
        // Every non-entry node must have at least one layer-0 edge.
        for node in state.nodes.values() {
            assert!(
                !node.neighbors[0].is_empty(),
                "node {} is isolated at layer 0",
                node.row
            );
        }
    }

    #[test]
    fn test_prune_caps_degree() {
        let mut state = state_with_points(&[]);
        state.config = IndexConfig {
            m: 2,
            m_max0: 2,
            ..IndexConfig::default()
        }
        .normalized();
        state.config.dimension = 1;
        state.store_node(0, vec![0.0], 0);
        for i in 1..=5 {
            state.store_node(i, vec![i as f64], 0);
            state.connect(0, i, 0);
        }
        assert_eq!(state.node(0).unwrap().neighbors[0].len(), 5);
        state.prune_connections(0, 0);
        let kept = state.node(0).unwrap().neighbors[0].clone();
        assert!(kept.len() <= 2, "degree bound violated: {kept:?}");
        // Evicted incumbents must have lost their back-edge too.
        for i in 1..=5 {
            let back = state.node(i).unwrap().neighbors[0].contains(&0);
            assert_eq!(back, kept.contains(&i), "asymmetric edge to {i}");
        }
    }

    #[test]
    fn test_erase_removes_all_back_references() {
        let mut state = HnswState::new(IndexConfig::default().normalized());
        state.config.dimension = 1;
        for i in 0..12 {
            state.insert_vector(i, vec![i as f64]);
        }
        assert!(state.erase_row(5));
        assert!(!state.erase_row(5), "second erase reports absence");
        assert_eq!(state.len(), 11);
        for node in state.nodes.values() {
            for list in &node.neighbors {
                assert!(!list.contains(&5), "stale edge to erased row on {}", node.row);
            }
        }
    }

    #[test]
    fn test_erase_entry_reelects() {
        let mut state = HnswState::new(IndexConfig::default().normalized());
        state.config.dimension = 1;
        for i in 0..10 {
            state.insert_vector(i, vec![i as f64]);
        }
        let entry = state.entry_row.unwrap();
        state.erase_row(entry);
        let new_entry = state.entry_row.unwrap();
        assert_ne!(new_entry, entry);
        let max_layer = state.nodes.values().map(|n| n.top_layer).max().unwrap();
        assert_eq!(state.entry_layer, max_layer);
        assert_eq!(state.node(new_entry).unwrap().top_layer, max_layer);
    }

    #[test]
    fn test_clear_nodes_resets_entry() {
        let mut state = HnswState::new(IndexConfig::default().normalized());
        state.config.dimension = 1;
        state.insert_vector(1, vec![1.0]);
        state.clear_nodes();
        assert!(state.is_empty());
        assert_eq!(state.entry_row, None);
        assert_eq!(state.entry_layer, -1);
        assert_eq!(state.config.dimension, 1, "dimension survives clear");
    }

    #[test]
    fn test_snapshot_vectors_sorted() {
        let mut state = HnswState::new(IndexConfig::default().normalized());
        state.config.dimension = 1;
        for row in [9, 3, 7] {
            state.insert_vector(row, vec![row as f64]);
        }
        let snapshot = state.snapshot_vectors();
        assert_eq!(
            snapshot.iter().map(|&(row, _)| row).collect::<Vec<_>>(),
            vec![3, 7, 9]
        );
        assert_eq!(snapshot[0].1, vec![3.0]);
    }

    #[test]
    fn test_insert_respects_metric() {
        let mut state = HnswState::new(
            IndexConfig::new(DistanceMetric::Cosine).normalized(),
        );
        state.config.dimension = 2;
        for (row, v) in [(0, [1.0, 0.0]), (1, [0.9, 0.1]), (2, [0.0, 1.0])] {
            state.insert_vector(row, v.to_vec());
        }
        let results = crate::hnsw::search::knn(&state, &[1.0, 0.05], 3, 0);
        assert_eq!(results[0].0, 0);
    }
}
