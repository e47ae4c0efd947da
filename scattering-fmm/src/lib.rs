//! # Distributed fast matrix multiply for multiple scattering
//!
//! Matrix-vector products with the scattering operator of a system of many
//! electromagnetic scatterers, distributed over processes that each own a
//! contiguous range of scatterers.
//!
//! Interactions between pairs of scatterers are split into local ones, evaluated
//! where their source lives and reduced onto the owner of their target, and
//! non-local ones, evaluated where their target lives after distributing the
//! inputs they need. Both exchanges run on neighbourhood communicators and
//! overlap with kernel evaluation.
//!
//! Notable features of this library are:
//! * Forward and transpose products from a single plan.
//! * Pluggable interaction kernels and communicators, through traits.
//! * An in-process threaded communicator, and an MPI one behind the `mpi` feature.
//! * A dense direct solve path on a process grid, for small systems.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod comm;
pub mod fmm;
pub mod kernel;
pub mod solver;
pub mod topology;
pub mod traits;

// Public API
#[doc(inline)]
pub use fmm::FastMatrixMultiply;
#[doc(inline)]
pub use fmm::FastMatrixMultiplyBuilder;
#[doc(inline)]
pub use fmm::Scatterer;
#[doc(inline)]
pub use traits::types::{Direction, FmmError, Result};
