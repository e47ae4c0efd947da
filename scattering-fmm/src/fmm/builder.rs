//! Builder for the distributed fast multiply
use std::{marker::PhantomData, sync::Arc};

use rlst::RlstScalar;

use crate::{
    topology::{graph_edges, CommunicationGraph, Distribution, InteractionMatrix},
    traits::{
        comm::GraphCommunicator,
        kernel::KernelFactory,
        types::{FmmError, Result},
    },
};

use super::{
    helpers::block_sizes,
    types::{FastMatrixMultiply, FastMatrixMultiplyBuilder, Scatterer},
};

/// Neighbourhoods of the two exchanges of a multiply.
///
/// The first graph connects ranks sharing non-local pairs and carries the input
/// distribution, the second connects ranks sharing local pairs and carries the
/// reduction. Communicators handed to [`FastMatrixMultiplyBuilder::communicators`]
/// must be created from these graphs, in this order.
pub fn neighbourhood_graphs(
    locals: &InteractionMatrix,
    distribution: &Distribution,
) -> Result<(CommunicationGraph, CommunicationGraph)> {
    Ok((
        graph_edges(&locals.complement(), distribution)?,
        graph_edges(locals, distribution)?,
    ))
}

impl<T, C, F> Default for FastMatrixMultiplyBuilder<T, C, F>
where
    T: RlstScalar,
    C: GraphCommunicator<T>,
    F: KernelFactory<T>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C, F> FastMatrixMultiplyBuilder<T, C, F>
where
    T: RlstScalar,
    C: GraphCommunicator<T>,
    F: KernelFactory<T>,
{
    /// Initialise an empty builder
    pub fn new() -> Self {
        Self {
            sizes: None,
            locals: None,
            distribution: None,
            distribute_communicator: None,
            reduce_communicator: None,
            kernels: None,
            _marker: PhantomData,
        }
    }

    /// Block sizes taken from the expansion order of each scatterer
    pub fn scatterers(self, scatterers: &[Scatterer]) -> Result<Self> {
        if let Some(i) = scatterers.iter().position(|s| s.expansion_order == 0) {
            return Err(FmmError::InvalidParameter(format!(
                "scatterer {} has expansion order 0",
                i
            )));
        }
        self.sizes(block_sizes(scatterers))
    }

    /// Explicit block size of each scatterer
    pub fn sizes(mut self, sizes: Vec<usize>) -> Result<Self> {
        if let Some(i) = sizes.iter().position(|&s| s == 0) {
            return Err(FmmError::InvalidParameter(format!(
                "scatterer {} has an empty block",
                i
            )));
        }
        self.sizes = Some(sizes);
        Ok(self)
    }

    /// Locality classification of scatterer pairs
    pub fn locals(mut self, locals: InteractionMatrix) -> Self {
        self.locals = Some(locals);
        self
    }

    /// Owner of each scatterer
    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = Some(distribution);
        self
    }

    /// Communicators for the input distribution and the reduction, see [`neighbourhood_graphs`].
    pub fn communicators(mut self, distribute: Arc<C>, reduce: Arc<C>) -> Self {
        self.distribute_communicator = Some(distribute);
        self.reduce_communicator = Some(reduce);
        self
    }

    /// Factory for the interaction kernels
    pub fn kernels(mut self, kernels: F) -> Self {
        self.kernels = Some(kernels);
        self
    }

    /// Plan the forward and transpose products
    pub fn build(self) -> Result<FastMatrixMultiply<T, C, F::Kernel>> {
        let missing = |what: &str| FmmError::InvalidParameter(format!("missing {}", what));

        let sizes = self.sizes.ok_or_else(|| missing("block sizes"))?;
        let locals = self.locals.ok_or_else(|| missing("locality classification"))?;
        let distribution = self.distribution.ok_or_else(|| missing("distribution"))?;
        let kernels = self.kernels.ok_or_else(|| missing("kernel factory"))?;
        let distribute_communicator = self
            .distribute_communicator
            .ok_or_else(|| missing("distribute communicator"))?;
        let reduce_communicator = self
            .reduce_communicator
            .ok_or_else(|| missing("reduce communicator"))?;

        FastMatrixMultiply::new(
            &kernels,
            &locals,
            &distribution,
            &sizes,
            distribute_communicator,
            reduce_communicator,
        )
    }
}

#[cfg(test)]
mod test {
    use rlst::c64;

    use crate::{
        comm::{local_worlds, LocalGraphCommunicator},
        fmm::helpers::dense_fixture,
        kernel::DenseInteraction,
        topology::{classify, partition},
    };

    use super::*;

    type Builder = FastMatrixMultiplyBuilder<c64, LocalGraphCommunicator, DenseInteraction<c64>>;

    fn scatterer(expansion_order: usize) -> Scatterer {
        Scatterer {
            centre: [0.0; 3],
            radius: 1.0,
            expansion_order,
        }
    }

    #[test]
    fn test_missing_parameters() {
        let result = Builder::new()
            .scatterers(&[scatterer(1), scatterer(2)])
            .unwrap()
            .locals(classify(2, 0))
            .build();
        assert!(matches!(result, Err(FmmError::InvalidParameter(_))));
    }

    #[test]
    fn test_invalid_blocks() {
        assert!(matches!(
            Builder::new().scatterers(&[scatterer(1), scatterer(0)]),
            Err(FmmError::InvalidParameter(_))
        ));
        assert!(matches!(
            Builder::new().sizes(vec![6, 0]),
            Err(FmmError::InvalidParameter(_))
        ));

        let builder = Builder::new().scatterers(&[scatterer(1), scatterer(2)]).unwrap();
        assert_eq!(builder.sizes, Some(vec![6, 16]));
    }

    #[test]
    fn test_inconsistent_dimensions() {
        let world = local_worlds(1).pop().unwrap();
        let distribute = Arc::new(world.graph([0]).unwrap());
        let reduce = Arc::new(world.graph([0]).unwrap());

        let result = Builder::new()
            .sizes(vec![6, 6, 6])
            .unwrap()
            .locals(classify(2, 0))
            .distribution(partition(3, 1).unwrap())
            .communicators(distribute, reduce)
            .kernels(dense_fixture(&[6, 6, 6], 0))
            .build();
        assert!(matches!(
            result,
            Err(FmmError::SizeMismatch {
                what: "interaction matrix",
                ..
            })
        ));
    }

    #[test]
    fn test_communicators_of_different_ranks() {
        let mut worlds = local_worlds(2);
        let second = worlds.pop().unwrap();
        let first = worlds.pop().unwrap();

        let result = Builder::new()
            .sizes(vec![6, 6])
            .unwrap()
            .locals(classify(2, 0))
            .distribution(partition(2, 2).unwrap())
            .communicators(
                Arc::new(first.graph([0, 1]).unwrap()),
                Arc::new(second.graph([0, 1]).unwrap()),
            )
            .kernels(dense_fixture(&[6, 6], 0))
            .build();
        assert!(matches!(result, Err(FmmError::Topology(_))));
    }

    #[test]
    fn test_rank_outside_distribution() {
        // Third rank of a world, with scatterers distributed over two ranks
        let world = local_worlds(3).pop().unwrap();

        let result = Builder::new()
            .sizes(vec![6, 6])
            .unwrap()
            .locals(classify(2, 0))
            .distribution(partition(2, 2).unwrap())
            .communicators(
                Arc::new(world.graph([2]).unwrap()),
                Arc::new(world.graph([2]).unwrap()),
            )
            .kernels(dense_fixture(&[6, 6], 0))
            .build();
        assert!(matches!(result, Err(FmmError::Topology(_))));
    }

    #[test]
    fn test_neighbourhood_graphs() {
        // Tridiagonal locality over three ranks with one scatterer each
        let locals = classify(3, 1);
        let distribution = partition(3, 3).unwrap();
        let (distribute, reduce) = neighbourhood_graphs(&locals, &distribution).unwrap();

        let sets = |graph: &CommunicationGraph| {
            graph
                .iter()
                .map(|s| s.iter().copied().collect::<Vec<_>>())
                .collect::<Vec<_>>()
        };
        assert_eq!(sets(&distribute), vec![vec![2], vec![], vec![0]]);
        assert_eq!(sets(&reduce), vec![vec![0, 1], vec![0, 1, 2], vec![1, 2]]);
    }
}
