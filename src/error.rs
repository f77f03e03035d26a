//! Error types for index construction and loading.

use thiserror::Error;

/// Failures that can occur while building or loading a tunneled index.
///
/// Navigation itself cannot fail on a well-formed index; every variant
/// here is raised before an index is handed out.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error while reading input files or (de)serializing an index.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A side file does not have the expected number of elements.
    #[error("dimension mismatch: expected {expected} elements, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// The out- and in-bitvectors disagree on the number of nodes.
    #[error("tunnel imbalance: {dout} dout blocks vs {din} din blocks")]
    TunnelImbalance { dout: usize, din: usize },

    /// A loaded bitvector is missing the trailing sentinel bit.
    #[error("missing sentinel bit at the end of a tunnel bitvector")]
    MissingSentinel,
}

/// A specialized Result type for index operations.
pub type Result<T> = std::result::Result<T, Error>;
