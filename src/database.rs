//! Host database stand-in: named vector columns with optional indexes.
//!
//! A [`Database`] holds named columns mapping row ids to `f64` list values.
//! Attaching a vector index to a column bulk-indexes its stored rows and keeps
//! the index in sync with every later row mutation. Search entry points mirror
//! the language-binding surface: k-NN, radius, stats, metrics, and a filtered
//! variant that intersects results with a caller-supplied row set.
//!
//! Cloning a `Database` produces a new handle to the same shared data.

use crate::error::{IndexError, Result};
use crate::hnsw::graph::IndexConfig;
use crate::hnsw::{DistanceMetric, IndexStats, MetricsSnapshot, RowId, VectorIndex};
use crate::storage::array::{StorageHandle, StoredArray};
use crate::storage::persistence;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// One vector column: stored list values plus an optional index.
#[derive(Debug, Default)]
struct Column {
    values: HashMap<RowId, Vec<f64>>,
    index: Option<Arc<VectorIndex>>,
}

/// Serializable image of one column, written to snapshot files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnImage {
    pub name: String,
    pub rows: Vec<(RowId, Vec<f64>)>,
    pub index: Option<IndexImage>,
}

/// Serializable image of a column's index: full configuration plus the
/// committed storage root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexImage {
    pub config: IndexConfig,
    pub root: Option<StoredArray>,
}

/// A thread-safe set of named vector columns.
#[derive(Debug, Clone, Default)]
pub struct Database {
    columns: Arc<RwLock<HashMap<String, Column>>>,
}

impl Database {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a database from the snapshots in `dir`.
    pub fn open_from(dir: impl AsRef<Path>) -> Result<Self> {
        let mut columns = HashMap::new();
        for image in persistence::load_all_columns(dir.as_ref())? {
            let values: HashMap<RowId, Vec<f64>> = image.rows.into_iter().collect();
            let index = match image.index {
                Some(index_image) => {
                    let storage = match index_image.root {
                        Some(root) => StorageHandle::with_root(root),
                        None => StorageHandle::new(),
                    };
                    Some(Arc::new(VectorIndex::open(index_image.config, storage)?))
                }
                None => None,
            };
            columns.insert(image.name, Column { values, index });
        }
        Ok(Self {
            columns: Arc::new(RwLock::new(columns)),
        })
    }

    /// Writes one snapshot file per column into `dir`.
    pub fn save_to(&self, dir: impl AsRef<Path>) -> Result<()> {
        let columns = self.columns.read();
        for (name, column) in columns.iter() {
            let mut rows: Vec<(RowId, Vec<f64>)> = column
                .values
                .iter()
                .map(|(&row, values)| (row, values.clone()))
                .collect();
            rows.sort_unstable_by_key(|&(row, _)| row);
            let image = ColumnImage {
                name: name.clone(),
                rows,
                index: column.index.as_ref().map(|index| IndexImage {
                    config: index.config(),
                    root: index.storage().snapshot(),
                }),
            };
            persistence::save_column(&image, dir.as_ref())?;
        }
        Ok(())
    }

    /// Creates an empty column. Fails if the name is taken.
    pub fn create_column(&self, name: &str) -> Result<()> {
        let mut columns = self.columns.write();
        if columns.contains_key(name) {
            return Err(IndexError::BadArgument(format!(
                "column '{name}' already exists"
            )));
        }
        columns.insert(name.to_string(), Column::default());
        Ok(())
    }

    /// Names of all columns.
    pub fn list_columns(&self) -> Vec<String> {
        self.columns.read().keys().cloned().collect()
    }

    /// Stores a list value for a row, updating the column's index if present.
    ///
    /// On a dimension mismatch neither the stored value nor the index changes.
    pub fn set_list(&self, column: &str, row: RowId, values: Vec<f64>) -> Result<()> {
        let mut columns = self.columns.write();
        let col = Self::column_mut(&mut columns, column)?;
        let index = col.index.clone();
        match index {
            Some(index) => {
                let previous = col.values.insert(row, values);
                if let Err(e) = index.set(row, &col.values) {
                    match previous {
                        Some(old) => {
                            col.values.insert(row, old);
                        }
                        None => {
                            col.values.remove(&row);
                        }
                    }
                    return Err(e);
                }
                Ok(())
            }
            None => {
                col.values.insert(row, values);
                Ok(())
            }
        }
    }

    /// Reads the list value stored for a row.
    pub fn get_list(&self, column: &str, row: RowId) -> Result<Option<Vec<f64>>> {
        let columns = self.columns.read();
        let col = Self::column_ref(&columns, column)?;
        Ok(col.values.get(&row).cloned())
    }

    /// Removes a row from the column and its index. Returns whether a value
    /// was stored.
    pub fn erase_row(&self, column: &str, row: RowId) -> Result<bool> {
        let mut columns = self.columns.write();
        let col = Self::column_mut(&mut columns, column)?;
        let existed = col.values.remove(&row).is_some();
        if let Some(index) = &col.index {
            index.erase(row);
        }
        Ok(existed)
    }

    /// Attaches a vector index to a column and bulk-indexes its stored rows.
    ///
    /// Rows whose vector list is still empty attach as silent no-ops and are
    /// picked up by later [`set_list`](Self::set_list) calls. Zero `m` or
    /// `ef_construction` select the library defaults.
    pub fn create_index(
        &self,
        column: &str,
        m: usize,
        ef_construction: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        let mut columns = self.columns.write();
        let col = Self::column_mut(&mut columns, column)?;
        if col.index.is_some() {
            return Err(IndexError::BadArgument(format!(
                "column '{column}' already has an index"
            )));
        }

        let index_config = IndexConfig {
            m,
            m_max0: 0,
            ef_construction,
            ef_search: 0,
            ..IndexConfig::new(metric)
        }
        .normalized();
        let index = Arc::new(VectorIndex::create(index_config, StorageHandle::new()));

        let mut rows: Vec<RowId> = col.values.keys().copied().collect();
        rows.sort_unstable();
        let attached = index.insert_bulk(&rows, &col.values)?;
        col.index = Some(index);
        tracing::info!(
            "Created vector index on column '{}' ({} of {} rows attached)",
            column,
            attached,
            rows.len()
        );
        Ok(())
    }

    /// Detaches a column's index, dropping its persistent root. Idempotent.
    pub fn remove_index(&self, column: &str) -> Result<()> {
        let mut columns = self.columns.write();
        let col = Self::column_mut(&mut columns, column)?;
        if col.index.take().is_some() {
            tracing::info!("Removed vector index from column '{}'", column);
        }
        Ok(())
    }

    /// Whether the column exists and has an index.
    pub fn has_index(&self, column: &str) -> bool {
        self.columns
            .read()
            .get(column)
            .is_some_and(|col| col.index.is_some())
    }

    /// Vector count and topmost layer of a column's index.
    pub fn stats(&self, column: &str) -> Result<IndexStats> {
        Ok(self.index_for(column)?.stats())
    }

    /// Operation counters of a column's index.
    pub fn metrics(&self, column: &str) -> Result<MetricsSnapshot> {
        Ok(self.index_for(column)?.metrics().snapshot())
    }

    /// k-nearest-neighbour search on a column's index.
    ///
    /// `ef_search` overrides the configured beam width when non-zero.
    pub fn search_knn(
        &self,
        column: &str,
        query: &[f64],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<(RowId, f64)>> {
        self.index_for(column)?.search_knn(query, k, ef_search)
    }

    /// Radius search on a column's index.
    pub fn search_radius(
        &self,
        column: &str,
        query: &[f64],
        max_distance: f64,
    ) -> Result<Vec<(RowId, f64)>> {
        self.index_for(column)?.search_radius(query, max_distance)
    }

    /// k-NN search intersected with a predicate-derived row set.
    ///
    /// The index itself knows nothing about predicates: callers evaluate
    /// their predicate over other columns, collect the matching rows, and the
    /// ascending result order survives the intersection. Fewer than `k` rows
    /// may come back when the filter is selective; widen `ef_search` or `k`
    /// to compensate.
    pub fn search_knn_filtered(
        &self,
        column: &str,
        query: &[f64],
        k: usize,
        ef_search: usize,
        allowed: &HashSet<RowId>,
    ) -> Result<Vec<(RowId, f64)>> {
        let mut results = self.search_knn(column, query, k, ef_search)?;
        results.retain(|(row, _)| allowed.contains(row));
        Ok(results)
    }

    fn index_for(&self, column: &str) -> Result<Arc<VectorIndex>> {
        let columns = self.columns.read();
        let col = Self::column_ref(&columns, column)?;
        col.index
            .clone()
            .ok_or_else(|| IndexError::NoIndex(column.to_string()))
    }

    fn column_ref<'a>(
        columns: &'a HashMap<String, Column>,
        name: &str,
    ) -> Result<&'a Column> {
        columns
            .get(name)
            .ok_or_else(|| IndexError::BadArgument(format!("no column '{name}'")))
    }

    fn column_mut<'a>(
        columns: &'a mut HashMap<String, Column>,
        name: &str,
    ) -> Result<&'a mut Column> {
        columns
            .get_mut(name)
            .ok_or_else(|| IndexError::BadArgument(format!("no column '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_db() -> Database {
        let db = Database::new();
        db.create_column("embedding").unwrap();
        for i in 0..10 {
            db.set_list("embedding", i, vec![i as f64, 2.0 * i as f64, 0.5 * i as f64])
                .unwrap();
        }
        db
    }

    #[test]
    fn test_create_column_rejects_duplicates() {
        let db = Database::new();
        db.create_column("a").unwrap();
        assert!(matches!(
            db.create_column("a").unwrap_err(),
            IndexError::BadArgument(_)
        ));
        assert_eq!(db.list_columns(), vec!["a".to_string()]);
    }

    #[test]
    fn test_missing_column_is_bad_argument() {
        let db = Database::new();
        assert!(matches!(
            db.set_list("ghost", 0, vec![1.0]).unwrap_err(),
            IndexError::BadArgument(_)
        ));
        assert!(matches!(
            db.search_knn("ghost", &[1.0], 1, 0).unwrap_err(),
            IndexError::BadArgument(_)
        ));
    }

    #[test]
    fn test_search_without_index_is_no_index() {
        let db = populated_db();
        let err = db.search_knn("embedding", &[0.0, 0.0, 0.0], 1, 0).unwrap_err();
        assert!(matches!(err, IndexError::NoIndex(name) if name == "embedding"));
        assert!(!db.has_index("embedding"));
    }

    #[test]
    fn test_create_index_bulk_attaches() {
        let db = populated_db();
        db.create_index("embedding", 16, 200, DistanceMetric::Euclidean)
            .unwrap();
        assert!(db.has_index("embedding"));

        let stats = db.stats("embedding").unwrap();
        assert_eq!(stats.num_vectors, 10);
        assert!(stats.max_layer >= 0);

        let results = db.search_knn("embedding", &[5.0, 10.0, 2.5], 3, 0).unwrap();
        assert_eq!(results[0].0, 5);
        assert!(results[0].1 < 0.01);
    }

    #[test]
    fn test_create_index_twice_fails() {
        let db = populated_db();
        db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
            .unwrap();
        assert!(matches!(
            db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
                .unwrap_err(),
            IndexError::BadArgument(_)
        ));
    }

    #[test]
    fn test_remove_index_is_idempotent() {
        let db = populated_db();
        db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
            .unwrap();
        db.remove_index("embedding").unwrap();
        assert!(!db.has_index("embedding"));
        db.remove_index("embedding").unwrap();
        assert!(matches!(
            db.stats("embedding").unwrap_err(),
            IndexError::NoIndex(_)
        ));
    }

    #[test]
    fn test_row_mutations_keep_index_in_sync() {
        let db = populated_db();
        db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
            .unwrap();

        // Update an existing row: searches must see the new position.
        db.set_list("embedding", 5, vec![100.0, 100.0, 100.0]).unwrap();
        let results = db
            .search_knn("embedding", &[100.0, 100.0, 100.0], 1, 0)
            .unwrap();
        assert_eq!(results[0].0, 5);

        // A brand-new row becomes searchable.
        db.set_list("embedding", 50, vec![-3.0, -3.0, -3.0]).unwrap();
        assert_eq!(db.stats("embedding").unwrap().num_vectors, 11);

        // Erasing a row removes it from results.
        assert!(db.erase_row("embedding", 5).unwrap());
        assert_eq!(db.stats("embedding").unwrap().num_vectors, 10);
        let results = db
            .search_knn("embedding", &[100.0, 100.0, 100.0], 10, 0)
            .unwrap();
        assert!(results.iter().all(|&(row, _)| row != 5));
    }

    #[test]
    fn test_set_list_rolls_back_on_dimension_mismatch() {
        let db = populated_db();
        db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
            .unwrap();
        let err = db.set_list("embedding", 3, vec![1.0]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        // Stored value and index both keep the old vector.
        assert_eq!(
            db.get_list("embedding", 3).unwrap(),
            Some(vec![3.0, 6.0, 1.5])
        );
        let results = db.search_knn("embedding", &[3.0, 6.0, 1.5], 1, 0).unwrap();
        assert_eq!(results[0].0, 3);
    }

    #[test]
    fn test_bulk_attach_skips_unpopulated_rows() {
        let db = Database::new();
        db.create_column("embedding").unwrap();
        db.set_list("embedding", 0, vec![1.0, 0.0]).unwrap();
        db.set_list("embedding", 1, vec![]).unwrap();
        db.set_list("embedding", 2, vec![0.0, 1.0]).unwrap();

        db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
            .unwrap();
        assert_eq!(db.stats("embedding").unwrap().num_vectors, 2);

        // Populating the row later brings it into the index.
        db.set_list("embedding", 1, vec![1.0, 1.0]).unwrap();
        assert_eq!(db.stats("embedding").unwrap().num_vectors, 3);
    }

    #[test]
    fn test_filtered_search_intersects() {
        let db = populated_db();
        db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
            .unwrap();

        let allowed: HashSet<RowId> = [1, 3, 5, 7, 9].into_iter().collect();
        let results = db
            .search_knn_filtered("embedding", &[0.0, 0.0, 0.0], 10, 0, &allowed)
            .unwrap();
        assert_eq!(
            results.iter().map(|&(row, _)| row).collect::<Vec<_>>(),
            vec![1, 3, 5, 7, 9],
            "order survives the intersection"
        );

        let none: HashSet<RowId> = HashSet::new();
        assert!(db
            .search_knn_filtered("embedding", &[0.0, 0.0, 0.0], 10, 0, &none)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_radius_surface() {
        let db = Database::new();
        db.create_column("measure").unwrap();
        for i in 0..10 {
            db.set_list("measure", i, vec![i as f64]).unwrap();
        }
        db.create_index("measure", 0, 0, DistanceMetric::Euclidean)
            .unwrap();
        let results = db.search_radius("measure", &[0.0], 3.5).unwrap();
        assert_eq!(
            results.iter().map(|&(row, _)| row).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_metrics_surface() {
        let db = populated_db();
        db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
            .unwrap();
        db.search_knn("embedding", &[0.0, 0.0, 0.0], 2, 0).unwrap();
        db.search_radius("embedding", &[0.0, 0.0, 0.0], 1.0).unwrap();

        let metrics = db.metrics("embedding").unwrap();
        assert_eq!(metrics.inserts, 10);
        assert_eq!(metrics.searches, 1);
        assert_eq!(metrics.radius_searches, 1);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = std::env::temp_dir().join(format!("vicinity_db_{}", uuid::Uuid::new_v4()));
        let db = populated_db();
        db.create_index("embedding", 0, 0, DistanceMetric::Euclidean)
            .unwrap();
        let before = db.search_knn("embedding", &[5.0, 10.0, 2.5], 5, 0).unwrap();
        db.save_to(&dir).unwrap();

        let reopened = Database::open_from(&dir).unwrap();
        assert!(reopened.has_index("embedding"));
        assert_eq!(reopened.stats("embedding").unwrap().num_vectors, 10);
        assert_eq!(
            reopened.get_list("embedding", 7).unwrap(),
            Some(vec![7.0, 14.0, 3.5])
        );
        let after = reopened
            .search_knn("embedding", &[5.0, 10.0, 2.5], 5, 0)
            .unwrap();
        assert_eq!(before, after);

        // The restored index keeps accepting writes.
        reopened
            .set_list("embedding", 99, vec![0.1, 0.2, 0.3])
            .unwrap();
        assert_eq!(reopened.stats("embedding").unwrap().num_vectors, 11);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_snapshot_without_index() {
        let dir = std::env::temp_dir().join(format!("vicinity_db_{}", uuid::Uuid::new_v4()));
        let db = populated_db();
        db.save_to(&dir).unwrap();

        let reopened = Database::open_from(&dir).unwrap();
        assert!(!reopened.has_index("embedding"));
        assert_eq!(
            reopened.get_list("embedding", 2).unwrap(),
            Some(vec![2.0, 4.0, 1.0])
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_from_missing_dir_is_empty() {
        let db = Database::open_from("/tmp/vicinity_missing_db_dir").unwrap();
        assert!(db.list_columns().is_empty());
    }
}
