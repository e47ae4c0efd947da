//! Dense direct solve of the full scattering system on a process grid.
//!
//! This path is an alternative to the iterative solver driven by the fast
//! multiply, for systems small enough to assemble.
mod context;
mod direct;

pub use context::{GridContext, GridRegistry};
pub use direct::DirectSolver;
