//! Error types for Reroute Core.

use thiserror::Error;

/// Result type alias for replanning operations.
pub type Result<T> = std::result::Result<T, RerouteError>;

/// Errors that can occur in replanning operations.
#[derive(Error, Debug)]
pub enum RerouteError {
    /// A node id was not found in the tree it was used with.
    #[error("invalid node id: {0}")]
    InvalidNode(u64),

    /// An edge id was not found in the tree it was used with.
    #[error("invalid edge id: {0}")]
    InvalidEdge(u64),

    /// A path violated its structural invariants (empty, broken chain).
    #[error("malformed path: {0}")]
    MalformedPath(String),

    /// A configuration vector had the wrong dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimension the operation required.
        expected: usize,
        /// Dimension that was supplied.
        got: usize,
    },

    /// The planning-scene service could not be reached or returned garbage.
    #[error("scene service fault: {0}")]
    SceneFault(String),

    /// A replanner was started from a state it cannot handle.
    #[error("replanner precondition: {0}")]
    Precondition(String),

    /// The initial query could not be solved at all.
    #[error("planning failed: {0}")]
    PlanningFailed(String),

    /// Invalid engine or manager configuration.
    #[error("config error: {0}")]
    ConfigError(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
