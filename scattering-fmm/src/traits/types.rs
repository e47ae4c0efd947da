//! Utility types for trait definitions.

/// Errors raised while setting up or evaluating a distributed fast multiply.
#[derive(thiserror::Error, Debug)]
pub enum FmmError {
    /// A construction parameter is out of range, e.g. a zero process count.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Two sizes that must agree do not.
    #[error("Size mismatch for {what}: expected {expected}, found {found}")]
    SizeMismatch {
        /// Name of the quantity being checked
        what: &'static str,
        /// Size implied by the rest of the problem
        expected: usize,
        /// Size that was supplied
        found: usize,
    },

    /// A communicator does not connect ranks that must exchange data.
    #[error("Topology error: {0}")]
    Topology(String),

    /// A point to point or neighbourhood exchange failed. Never retried.
    #[error("Communication failure: {0}")]
    Communication(String),

    /// The dense solver returned a non-zero status.
    #[error("Singular or failed linear system (status {0})")]
    SingularSystem(i32),
}

/// Result type
pub type Result<T> = std::result::Result<T, FmmError>;

/// Which product a fast multiply evaluates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// `y = A x`
    Forward,
    /// `y = A^T x`
    Transpose,
}
