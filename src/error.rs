//! Library error type.
//!
//! Validation failures leave index state untouched; persistence failures leave
//! both the in-memory graph and the previously committed root intact.

/// Errors surfaced by index operations and the column surface.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A stored or query vector does not match the index dimension.
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// The named column has no vector index attached.
    #[error("no vector index on column '{0}'")]
    NoIndex(String),
    /// A caller-supplied argument is invalid.
    #[error("bad argument: {0}")]
    BadArgument(String),
    /// A persistent image was written by an unsupported format version.
    #[error("unsupported index format version {0}")]
    FormatVersion(u64),
    /// A persistent image is structurally invalid.
    #[error("corrupt index image: {0}")]
    Corrupt(String),
    /// An underlying I/O failure while reading or writing snapshot files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexError>;
