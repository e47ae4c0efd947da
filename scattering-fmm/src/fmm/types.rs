//! Data structures for the distributed fast multiply
use std::{marker::PhantomData, sync::Arc};

use crate::topology::{Distribution, InteractionMatrix};

use super::segment::SegmentMap;

/// A physical scatterer, contributing one block of multipole coefficients to
/// the global vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Scatterer {
    /// Centre of the scatterer
    pub centre: [f64; 3],

    /// Radius of the bounding sphere
    pub radius: f64,

    /// Maximum degree of the multipole expansion
    pub expansion_order: usize,
}

/// Plan and runtime state for gathering the remote inputs of the non-local kernel.
pub struct DistributeInput<T, C> {
    /// Neighbourhood communicator the exchange runs on
    pub communicator: Arc<C>,

    /// Number of elements expected from each neighbour
    pub receive_counts: Vec<usize>,

    /// Number of elements sent to each neighbour
    pub send_counts: Vec<usize>,

    /// Owned input to wire buffer
    pub relocate_send: SegmentMap,

    /// Wire buffer to synthesised input
    pub relocate_receive: SegmentMap,

    /// Length of the synthesised input vector
    pub synthesis_size: usize,

    pub(crate) _marker: PhantomData<T>,
}

/// Plan and runtime state for routing partial results to their owners.
pub struct ReduceComputation<T, C> {
    /// Neighbourhood communicator the exchange runs on
    pub communicator: Arc<C>,

    /// Number of elements sent to each neighbour
    pub send_counts: Vec<usize>,

    /// Number of elements expected from each neighbour
    pub receive_counts: Vec<usize>,

    /// Partial results to wire buffer
    pub relocate_send: SegmentMap,

    /// Wire buffer to owned output
    pub relocate_receive: SegmentMap,

    /// Total number of elements sent
    pub message_size: usize,

    pub(crate) _marker: PhantomData<T>,
}

/// Everything one direction (forward or transpose) of the multiply needs.
pub struct DirectionPlan<T, C, K> {
    /// Kernel for local pairs whose column this rank owns
    pub local_kernel: K,

    /// Kernel for non-local pairs whose row this rank owns
    pub nonlocal_kernel: K,

    /// Exchange feeding the non-local kernel
    pub distribute_input: DistributeInput<T, C>,

    /// Exchange routing local kernel results to their owners
    pub reduce_computation: ReduceComputation<T, C>,

    /// Owned input to local kernel input
    pub local_indices: SegmentMap,

    /// Non-local kernel output to owned output
    pub nonlocal_indices: SegmentMap,

    /// Length of the local kernel input
    pub local_size: usize,

    /// Length of the local kernel output
    pub local_output_size: usize,

    /// Length of the non-local kernel output
    pub nonlocal_output_size: usize,
}

/// Distributed matrix-vector product split into local and non-local interactions.
///
/// Every rank holds the unknowns of the scatterers it owns. A multiply overlaps
/// the communication of inputs and partial results with kernel evaluation.
pub struct FastMatrixMultiply<T, C, K> {
    /// Rank of this process
    pub rank: usize,

    /// Number of owned unknowns, which is both the input and output length
    pub n_owned: usize,

    /// Forward product plan
    pub forward: DirectionPlan<T, C, K>,

    /// Transpose product plan
    pub transpose: DirectionPlan<T, C, K>,
}

/// Assembles a [`FastMatrixMultiply`] from the problem description.
pub struct FastMatrixMultiplyBuilder<T, C, F> {
    /// Block size of each scatterer
    pub sizes: Option<Vec<usize>>,

    /// Locality classification of scatterer pairs
    pub locals: Option<InteractionMatrix>,

    /// Owner of each scatterer
    pub distribution: Option<Distribution>,

    /// Communicator for the input distribution exchange
    pub distribute_communicator: Option<Arc<C>>,

    /// Communicator for the reduction exchange
    pub reduce_communicator: Option<Arc<C>>,

    /// Factory for interaction kernels
    pub kernels: Option<F>,

    pub(crate) _marker: PhantomData<T>,
}
