//! Distributed fast matrix-vector multiply over scatterer interactions.
mod builder;
mod distribute;
pub mod helpers;
mod multiply;
mod reduce;
pub mod segment;
pub mod types;

pub use builder::neighbourhood_graphs;
pub use types::{
    DirectionPlan, DistributeInput, FastMatrixMultiply, FastMatrixMultiplyBuilder,
    ReduceComputation, Scatterer,
};
