//! Interaction kernel traits
use crate::{topology::InteractionMatrix, traits::types::Result};

/// Evaluation of a fixed subset of pairwise scatterer interactions.
///
/// A kernel is built for a boolean selection mask over scatterer pairs
/// `(i, j)`, meaning "the field scattered by `j` contributes to `i`". Inputs
/// and outputs are compact: the input vector is the concatenation of the
/// coefficient blocks of every column `j` that has at least one selected pair,
/// the output vector the concatenation of the blocks of every row `i` with at
/// least one selected pair, both in ascending scatterer index.
///
/// Kernels are purely computational and never communicate.
pub trait InteractionKernel<T> {
    /// Evaluate the selected interactions on a compact input vector.
    fn apply(&self, input: &[T]) -> Result<Vec<T>>;
}

/// Builds interaction kernels for a given physical setup.
///
/// Implementations carry the background medium, the wavenumber and the list of
/// scatterers. The fast multiply asks for one kernel per selection mask.
pub trait KernelFactory<T> {
    /// Kernel type produced by this factory.
    type Kernel: InteractionKernel<T>;

    /// Kernel evaluating `y_i += A_ij x_j` over the selected pairs.
    fn forward(&self, mask: &InteractionMatrix) -> Result<Self::Kernel>;

    /// Kernel evaluating `y_i += (A^T)_ij x_j = (A_ji)^T x_j` over the selected pairs.
    ///
    /// The mask is expressed in the coordinates of the transposed operator.
    fn transpose(&self, mask: &InteractionMatrix) -> Result<Self::Kernel>;
}
