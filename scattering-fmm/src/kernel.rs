//! Interaction kernels.
//!
//! Physical kernels (T-matrices, translation operators) live outside of this
//! crate and plug in through [`crate::traits::kernel::KernelFactory`]. The dense
//! kernel provided here evaluates an explicitly assembled operator, and serves
//! as a reference for testing and for small problems.
pub mod dense;

pub use dense::{DenseInteraction, DenseKernel, DenseMatrix};
