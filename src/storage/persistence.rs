//! Index serialization and column snapshot files.
//!
//! An index image (format version 1) is a [`StoredArray`] tree:
//!
//! ```text
//! root (refs):
//!   [0]    metadata (ints): [format_version, entry_row, entry_layer,
//!                            dimension, M, ef_construction, ef_search]
//!   [1..N] node (refs):
//!            [0] info (ints):   [row_id, top_layer]
//!            [1] vector (ints): doubles bit-cast to i64 (IEEE-754 preserved)
//!            [2..2+top_layer]   neighbours per layer (ints): row ids
//! ```
//!
//! Column snapshots are written to disk as `[bincode payload][magic "VXC1"]
//! [CRC32 BE]` using an atomic temp-file + rename, so a crash mid-write never
//! corrupts an existing snapshot.

use crate::database::ColumnImage;
use crate::error::{IndexError, Result};
use crate::hnsw::graph::{HnswState, IndexConfig, Node};
use crate::hnsw::RowId;
use crate::storage::array::StoredArray;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

/// Version written into every index image; readers reject anything else.
pub const FORMAT_VERSION: u64 = 1;

/// Magic bytes appended before the CRC32 footer of a column snapshot.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"VXC1";

/// File extension for column snapshots.
const SNAPSHOT_EXT: &str = "vxc";

// ── Index image (array tree) ───────────────────────────────────────

/// Serializes the graph into a fresh storage tree.
///
/// Nodes are emitted in ascending row order so identical graphs produce
/// identical trees.
pub(crate) fn encode_index(state: &HnswState) -> StoredArray {
    let metadata = vec![
        FORMAT_VERSION as i64,
        state.entry_row.unwrap_or(0),
        state.entry_layer as i64,
        state.config.dimension as i64,
        state.config.m as i64,
        state.config.ef_construction as i64,
        state.config.ef_search as i64,
    ];

    let mut root = Vec::with_capacity(1 + state.nodes.len());
    root.push(StoredArray::Ints(metadata));

    let mut rows: Vec<RowId> = state.nodes.keys().copied().collect();
    rows.sort_unstable();
    for row in rows {
        let node = &state.nodes[&row];
        let mut arrays = Vec::with_capacity(2 + node.neighbors.len());
        arrays.push(StoredArray::Ints(vec![node.row, node.top_layer as i64]));
        arrays.push(StoredArray::Ints(
            node.vector.iter().map(|v| v.to_bits() as i64).collect(),
        ));
        for layer in 0..=node.top_layer {
            let list = node
                .neighbors
                .get(layer as usize)
                .cloned()
                .unwrap_or_default();
            arrays.push(StoredArray::Ints(list));
        }
        root.push(StoredArray::Refs(arrays));
    }

    StoredArray::Refs(root)
}

/// Rebuilds a graph from a storage tree.
///
/// Strict on [`FORMAT_VERSION`]. The metadata restores `M`, `ef_construction`,
/// `ef_search`, and the dimension; `metric`, `m_max0`, `level_scale`, and
/// `seed` are taken from the runtime-supplied configuration, which is the
/// documented set of parameters a caller may retune on reopen.
pub(crate) fn decode_index(root: &StoredArray, runtime: IndexConfig) -> Result<HnswState> {
    let refs = root
        .as_refs()
        .ok_or_else(|| IndexError::Corrupt("root is not a reference array".into()))?;
    if refs.is_empty() {
        return Ok(HnswState::new(runtime));
    }

    let metadata = refs[0]
        .as_ints()
        .ok_or_else(|| IndexError::Corrupt("metadata is not an integer array".into()))?;
    if metadata.len() < 7 {
        return Err(IndexError::Corrupt(format!(
            "metadata has {} entries, expected 7",
            metadata.len()
        )));
    }
    let version = metadata[0] as u64;
    if version != FORMAT_VERSION {
        return Err(IndexError::FormatVersion(version));
    }
    for (i, &value) in metadata.iter().enumerate().skip(3) {
        if value < 0 {
            return Err(IndexError::Corrupt(format!(
                "metadata entry {i} is negative: {value}"
            )));
        }
    }

    let entry_layer = metadata[2] as i32;
    let entry_row = if entry_layer < 0 {
        None
    } else {
        Some(metadata[1])
    };

    let mut config = runtime;
    config.dimension = metadata[3] as usize;
    config.m = metadata[4] as usize;
    config.ef_construction = metadata[5] as usize;
    config.ef_search = metadata[6] as usize;

    let mut nodes: HashMap<RowId, Node> = HashMap::with_capacity(refs.len() - 1);
    for node_array in &refs[1..] {
        let arrays = node_array
            .as_refs()
            .ok_or_else(|| IndexError::Corrupt("node is not a reference array".into()))?;
        if arrays.len() < 2 {
            return Err(IndexError::Corrupt(format!(
                "node has {} arrays, expected at least 2",
                arrays.len()
            )));
        }

        let info = arrays[0]
            .as_ints()
            .ok_or_else(|| IndexError::Corrupt("node info is not an integer array".into()))?;
        if info.len() < 2 || info[1] < 0 {
            return Err(IndexError::Corrupt("node info is malformed".into()));
        }
        let row = info[0];
        let top_layer = info[1] as i32;

        let bits = arrays[1]
            .as_ints()
            .ok_or_else(|| IndexError::Corrupt("node vector is not an integer array".into()))?;
        let vector: Vec<f64> = bits.iter().map(|&b| f64::from_bits(b as u64)).collect();
        if config.dimension > 0 && vector.len() != config.dimension {
            return Err(IndexError::Corrupt(format!(
                "node {row} vector has length {}, expected {}",
                vector.len(),
                config.dimension
            )));
        }

        let mut neighbors = vec![Vec::new(); (top_layer + 1) as usize];
        for layer in 0..=top_layer as usize {
            if let Some(list) = arrays.get(2 + layer) {
                let ids = list.as_ints().ok_or_else(|| {
                    IndexError::Corrupt("neighbour list is not an integer array".into())
                })?;
                neighbors[layer] = ids.to_vec();
            }
        }

        nodes.insert(
            row,
            Node {
                row,
                vector,
                top_layer,
                neighbors,
            },
        );
    }

    if let Some(entry) = entry_row {
        if !nodes.contains_key(&entry) {
            return Err(IndexError::Corrupt(format!(
                "entry point {entry} is not among the stored nodes"
            )));
        }
    }

    Ok(HnswState::from_parts(config, nodes, entry_row, entry_layer))
}

// ── Column snapshot files ──────────────────────────────────────────

/// Save a column image to `dir/{name}.vxc` with a CRC32 footer, atomically.
pub fn save_column(image: &ColumnImage, dir: &Path) -> io::Result<()> {
    let bytes = bincode::serialize(image).map_err(|e| io::Error::other(e.to_string()))?;

    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{SNAPSHOT_EXT}", image.name));
    let tmp_path = dir.join(format!("{}.{SNAPSHOT_EXT}.tmp", image.name));

    let crc = crc32fast::hash(&bytes);
    let mut out = Vec::with_capacity(bytes.len() + 8);
    out.extend_from_slice(&bytes);
    out.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());

    fs::write(&tmp_path, &out)?;
    fs::rename(&tmp_path, &path)?;

    tracing::info!(
        "Saved column '{}' ({} bytes, CRC32={:#010x})",
        image.name,
        bytes.len(),
        crc
    );
    Ok(())
}

/// Load a column image, verifying the magic bytes and CRC32 footer.
pub fn load_column(path: &Path) -> io::Result<ColumnImage> {
    let raw = fs::read(path)?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("snapshot {path:?} has no CRC32 footer"),
        ));
    }

    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "snapshot CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}. File may be corrupted: {path:?}"
            ),
        ));
    }
    tracing::debug!("Snapshot CRC32 verified: {:#010x}", stored_crc);

    bincode::deserialize(payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// Load every `.vxc` snapshot in a directory. Unreadable files are skipped
/// with a warning.
pub fn load_all_columns(dir: &Path) -> io::Result<Vec<ColumnImage>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some(SNAPSHOT_EXT) {
            match load_column(&path) {
                Ok(image) => images.push(image),
                Err(e) => {
                    tracing::warn!("Failed to load {:?}: {}", path, e);
                }
            }
        }
    }
    Ok(images)
}
