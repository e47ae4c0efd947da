//! # Trait Definitions
pub mod comm;
pub mod kernel;
pub mod solver;
pub mod types;
