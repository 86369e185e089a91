//! Global configuration constants for vicinity.
//!
//! All tuning parameters and structural caps are defined here. Per-index
//! runtime configuration is carried by [`crate::hnsw::IndexConfig`].

/// Default number of bidirectional links per HNSW node on upper layers.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Floor for the derived default search ef.
///
/// When unset, `ef_search` resolves to `max(HNSW_MIN_EF_SEARCH, 8 * m)`.
pub const HNSW_MIN_EF_SEARCH: usize = 64;

/// Hard cap on the layer a node can be assigned to.
///
/// Bounds worst-case graph height regardless of how the geometric layer
/// sampler rolls.
pub const HNSW_MAX_LAYER: i32 = 32;

/// Layer-sampling scale: nodes land on layer `floor(-ln(uniform) * scale)`.
///
/// The value is `1 / ln 2`, halving the expected population per layer.
pub const HNSW_LEVEL_SCALE: f64 = 1.442_695_040_888_963_4;

/// Default seed for the per-index random stream.
///
/// Re-seeding from the same value reproduces layer assignments, which keeps
/// insertion orderings deterministic in tests.
pub const HNSW_DEFAULT_SEED: u64 = 42;
