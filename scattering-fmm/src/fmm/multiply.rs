//! Overlapped evaluation of the distributed product
use std::{sync::Arc, time::Instant};

use log::{trace, warn};
use rlst::RlstScalar;

use crate::{
    topology::{Distribution, InteractionMatrix},
    traits::{
        comm::{ExchangeRequest, GraphCommunicator},
        kernel::{InteractionKernel, KernelFactory},
        types::{Direction, FmmError, Result},
    },
};

use super::{
    helpers::{check_dimensions, compact_offsets, selected_size},
    segment::SegmentMap,
    types::{DirectionPlan, DistributeInput, FastMatrixMultiply, ReduceComputation},
};

impl<T, C, K> DirectionPlan<T, C, K>
where
    T: RlstScalar,
    C: GraphCommunicator<T>,
    K: InteractionKernel<T>,
{
    /// Plan one direction of the product for a given locality classification.
    ///
    /// Local pairs are evaluated on the owner of their column and reduced onto
    /// the owner of their row. Non-local pairs are evaluated on the owner of
    /// their row once the owner of their column has distributed its input.
    pub fn new<F>(
        kernels: &F,
        direction: Direction,
        locals: &InteractionMatrix,
        distribution: &Distribution,
        sizes: &[usize],
        distribute_communicator: Arc<C>,
        reduce_communicator: Arc<C>,
    ) -> Result<Self>
    where
        F: KernelFactory<T, Kernel = K>,
    {
        check_dimensions(locals, distribution, sizes)?;
        let rank = distribute_communicator.rank();
        let nonlocals = locals.complement();

        let local_mask = locals.select(|_, j| distribution.owner(j) == rank);
        let nonlocal_mask = nonlocals.select(|i, _| distribution.owner(i) == rank);

        let distribute_input =
            DistributeInput::new(distribute_communicator, &nonlocals, distribution, sizes)?;
        let reduce_computation =
            ReduceComputation::new(reduce_communicator, locals, distribution, sizes)?;

        let owned_offsets = compact_offsets(&distribution.owned_by(rank), sizes);

        // Owned input to the compact input of the local kernel
        let local_inputs = local_mask.active_columns();
        let mut local_indices = SegmentMap::new();
        for (j, offset) in compact_offsets(&local_inputs, sizes).iter().enumerate() {
            if let (Some(source), Some(destination)) = (owned_offsets[j], offset) {
                local_indices.push(sizes[j], source, *destination);
            }
        }

        // Compact output of the non-local kernel to owned output
        let nonlocal_outputs = nonlocal_mask.active_rows();
        let mut nonlocal_indices = SegmentMap::new();
        for (i, offset) in compact_offsets(&nonlocal_outputs, sizes).iter().enumerate() {
            if let (Some(source), Some(destination)) = (offset, owned_offsets[i]) {
                nonlocal_indices.push(sizes[i], *source, destination);
            }
        }

        let (local_kernel, nonlocal_kernel) = match direction {
            Direction::Forward => (
                kernels.forward(&local_mask)?,
                kernels.forward(&nonlocal_mask)?,
            ),
            Direction::Transpose => (
                kernels.transpose(&local_mask)?,
                kernels.transpose(&nonlocal_mask)?,
            ),
        };

        Ok(Self {
            local_kernel,
            nonlocal_kernel,
            distribute_input,
            reduce_computation,
            local_indices,
            nonlocal_indices,
            local_size: selected_size(&local_inputs, sizes),
            local_output_size: selected_size(&local_mask.active_rows(), sizes),
            nonlocal_output_size: selected_size(&nonlocal_outputs, sizes),
        })
    }
}

impl<T, C, K> FastMatrixMultiply<T, C, K>
where
    T: RlstScalar,
    C: GraphCommunicator<T>,
    K: InteractionKernel<T>,
{
    /// Plan forward and transpose products.
    ///
    /// # Arguments
    /// * `kernels` - Factory building the interaction kernels.
    /// * `locals` - Locality classification of scatterer pairs.
    /// * `distribution` - Owner of each scatterer.
    /// * `sizes` - Block size of each scatterer.
    /// * `distribute_communicator` - Neighbourhood of the non-local pairs.
    /// * `reduce_communicator` - Neighbourhood of the local pairs.
    pub fn new<F>(
        kernels: &F,
        locals: &InteractionMatrix,
        distribution: &Distribution,
        sizes: &[usize],
        distribute_communicator: Arc<C>,
        reduce_communicator: Arc<C>,
    ) -> Result<Self>
    where
        F: KernelFactory<T, Kernel = K>,
    {
        let rank = distribute_communicator.rank();
        if reduce_communicator.rank() != rank {
            return Err(FmmError::Topology(format!(
                "distribute and reduce communicators disagree on the rank ({} and {})",
                rank,
                reduce_communicator.rank()
            )));
        }
        if rank >= distribution.nprocs() {
            return Err(FmmError::Topology(format!(
                "rank {} is outside of a distribution over {} ranks",
                rank,
                distribution.nprocs()
            )));
        }

        let n_owned = selected_size(&distribution.owned_by(rank), sizes);
        if n_owned == 0 {
            warn!("rank {} owns no scatterers", rank);
        }

        // Pair classification and ownership are the same for the transpose, up
        // to swapping rows and columns, so both directions share communicators.
        let forward = DirectionPlan::new(
            kernels,
            Direction::Forward,
            locals,
            distribution,
            sizes,
            distribute_communicator.clone(),
            reduce_communicator.clone(),
        )?;
        let transpose = DirectionPlan::new(
            kernels,
            Direction::Transpose,
            &locals.transpose(),
            distribution,
            sizes,
            distribute_communicator,
            reduce_communicator,
        )?;

        Ok(Self {
            rank,
            n_owned,
            forward,
            transpose,
        })
    }

    /// Length of the owned output.
    pub fn rows(&self) -> usize {
        self.n_owned
    }

    /// Length of the owned input.
    pub fn cols(&self) -> usize {
        self.n_owned
    }

    /// Plan used for a given direction.
    pub fn plan(&self, direction: Direction) -> &DirectionPlan<T, C, K> {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Transpose => &self.transpose,
        }
    }

    /// `y = A x` restricted to the blocks owned by this rank.
    pub fn forward(&self, input: &[T]) -> Result<Vec<T>> {
        self.apply(input, Direction::Forward)
    }

    /// `y = A^T x` restricted to the blocks owned by this rank.
    pub fn transpose(&self, input: &[T]) -> Result<Vec<T>> {
        self.apply(input, Direction::Transpose)
    }

    /// Evaluate the product in a given direction into a new vector.
    pub fn apply(&self, input: &[T], direction: Direction) -> Result<Vec<T>> {
        let mut output = vec![T::zero(); self.rows()];
        self.apply_into(input, &mut output, direction)?;
        Ok(output)
    }

    /// Evaluate the product in a given direction, overwriting `output`.
    ///
    /// Must be called collectively: every rank of the communicators issues the
    /// same sequence of products.
    pub fn apply_into(&self, input: &[T], output: &mut [T], direction: Direction) -> Result<()> {
        if input.len() != self.cols() {
            return Err(FmmError::SizeMismatch {
                what: "input vector",
                expected: self.cols(),
                found: input.len(),
            });
        }
        if output.len() != self.rows() {
            return Err(FmmError::SizeMismatch {
                what: "output vector",
                expected: self.rows(),
                found: output.len(),
            });
        }

        let plan = self.plan(direction);
        let start = Instant::now();
        output.fill(T::zero());

        // Inputs of the non-local kernel travel while the local kernel runs
        let distribute_request = plan.distribute_input.send(input)?;
        let local_input = plan.local_indices.gather(input, plan.local_size);
        let partials = plan.local_kernel.apply(&local_input)?;
        check_length("local kernel output", plan.local_output_size, partials.len())?;
        let local_time = start.elapsed();

        // Local results travel while the non-local kernel runs
        let reduction_request = plan.reduce_computation.send(&partials)?;
        let received = distribute_request.wait()?;
        let distribute_time = start.elapsed();

        let nonlocal_input = plan.distribute_input.synthesize(&received);
        let nonlocal_output = plan.nonlocal_kernel.apply(&nonlocal_input)?;
        check_length(
            "non-local kernel output",
            plan.nonlocal_output_size,
            nonlocal_output.len(),
        )?;
        plan.nonlocal_indices.scatter(&nonlocal_output, output);
        let nonlocal_time = start.elapsed();

        let received = reduction_request.wait()?;
        plan.reduce_computation.reduce(output, &received);

        trace!(
            "rank {}: {:?} product, local kernel {:?}, input wait {:?}, non-local kernel {:?}, total {:?}",
            self.rank,
            direction,
            local_time,
            distribute_time,
            nonlocal_time,
            start.elapsed()
        );

        Ok(())
    }
}

fn check_length(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(FmmError::SizeMismatch {
            what,
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use itertools::Itertools;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rlst::c64;

    use crate::{
        comm::{run_local, LocalGraphCommunicator},
        fmm::{
            helpers::{dense_fixture, ncoeffs_scatterer, vector_fixture},
            neighbourhood_graphs, FastMatrixMultiplyBuilder,
        },
        kernel::{DenseInteraction, DenseKernel},
        topology::{classify, partition},
    };

    use super::*;

    type DenseMultiply = FastMatrixMultiply<c64, LocalGraphCommunicator, DenseKernel<c64>>;

    /// Owned slice of a global vector, for contiguous ownership.
    fn owned_slice(
        global: &[c64],
        distribution: &Distribution,
        sizes: &[usize],
        rank: usize,
    ) -> Vec<c64> {
        let mut offset = 0;
        let mut owned = Vec::new();
        for (i, &size) in sizes.iter().enumerate() {
            if distribution.owner(i) == rank {
                owned.extend_from_slice(&global[offset..offset + size]);
            }
            offset += size;
        }
        owned
    }

    fn build(
        world: &crate::comm::LocalWorld,
        factory: &DenseInteraction<c64>,
        locals: &InteractionMatrix,
        distribution: &Distribution,
    ) -> DenseMultiply {
        let (distribute_graph, reduce_graph) = neighbourhood_graphs(locals, distribution).unwrap();
        let rank = world.rank();
        let distribute = world.graph(distribute_graph[rank].iter().copied()).unwrap();
        let reduce = world.graph(reduce_graph[rank].iter().copied()).unwrap();

        FastMatrixMultiplyBuilder::new()
            .sizes(factory.sizes().to_vec())
            .unwrap()
            .locals(locals.clone())
            .distribution(distribution.clone())
            .communicators(Arc::new(distribute), Arc::new(reduce))
            .kernels(factory.clone())
            .build()
            .unwrap()
    }

    fn max_error(found: &[c64], expected: &[c64]) -> f64 {
        assert_eq!(found.len(), expected.len());
        found
            .iter()
            .zip(expected)
            .map(|(a, b)| (a - b).norm())
            .fold(0.0, f64::max)
    }

    /// Compare distributed forward and transpose products against the dense operator.
    fn check_against_dense(nprocs: usize, bandwidth: i64, orders: &[usize]) {
        let sizes = orders.iter().copied().map(ncoeffs_scatterer).collect_vec();
        let nscatterers = sizes.len();
        let factory = dense_fixture(&sizes, 0);
        let input = vector_fixture(sizes.iter().sum(), 1);
        let locals = classify(nscatterers, bandwidth);
        let distribution = partition(nscatterers, nprocs).unwrap();

        let results = run_local(nprocs, |world| {
            let fmm = build(&world, &factory, &locals, &distribution);
            let owned = owned_slice(&input, &distribution, &sizes, world.rank());
            (fmm.forward(&owned).unwrap(), fmm.transpose(&owned).unwrap())
        });

        let (forward, transpose): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        let forward = forward.concat();
        let transpose = transpose.concat();

        let expected = factory.product(&input, Direction::Forward);
        assert_relative_eq!(max_error(&forward, &expected), 0.0, epsilon = 1e-10);
        let expected = factory.product(&input, Direction::Transpose);
        assert_relative_eq!(max_error(&transpose, &expected), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_single_process_identity() {
        for bandwidth in [-1, 0, 1, 5] {
            check_against_dense(1, bandwidth, &[1, 2, 1, 1, 2]);
        }
    }

    #[test]
    fn test_multi_process() {
        let orders = [1, 2, 1, 1, 2, 1, 1];
        for nprocs in 2..=4 {
            for bandwidth in [-1, 0, 1, 2, 7] {
                check_against_dense(nprocs, bandwidth, &orders);
            }
        }
    }

    #[test]
    fn test_more_processes_than_scatterers() {
        check_against_dense(4, 1, &[1, 1, 2]);
    }

    #[test]
    fn test_disjoint_partition() {
        // Block diagonal operator whose blocks follow ownership, all pairs
        // within a block local
        let nprocs = 3;
        let sizes = vec![6; 6];
        let n = 36;
        let distribution = partition(6, nprocs).unwrap();
        let same_owner =
            |r: usize, c: usize| distribution.owner(r / 6) == distribution.owner(c / 6);

        let mut rng = StdRng::seed_from_u64(2);
        let mut entries = vec![c64::new(0.0, 0.0); n * n];
        let mut operator = rlst::rlst_dynamic_array2!(c64, [n, n]);
        for r in 0..n {
            for c in 0..n {
                if same_owner(r, c) {
                    entries[r * n + c] = c64::new(rng.gen(), rng.gen());
                    operator[[r, c]] = entries[r * n + c];
                }
            }
        }
        let factory = DenseInteraction::new(operator, sizes.clone()).unwrap();
        let locals =
            InteractionMatrix::from_fn(6, |i, j| distribution.owner(i) == distribution.owner(j));
        let input = vector_fixture(n, 3);

        let results = run_local(nprocs, |world| {
            let rank = world.rank();
            let fmm = build(&world, &factory, &locals, &distribution);
            let reduce = &fmm.forward.reduce_computation;
            assert_eq!(reduce.communicator.neighbourhood(), &[rank]);

            let owned = owned_slice(&input, &distribution, &sizes, rank);
            let output = fmm.forward(&owned).unwrap();

            // Product with the rank's own diagonal block only
            let start = 12 * rank;
            let expected = (0..12)
                .map(|r| {
                    (0..12)
                        .map(|c| entries[(start + r) * n + start + c] * owned[c])
                        .sum::<c64>()
                })
                .collect_vec();
            max_error(&output, &expected)
        });

        for error in results {
            assert_relative_eq!(error, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_repeated_products() {
        // Exchanges of consecutive products do not mix
        let sizes = vec![6, 16, 6, 6];
        let factory = dense_fixture(&sizes, 4);
        let locals = classify(4, 1);
        let distribution = partition(4, 2).unwrap();
        let inputs = [vector_fixture(34, 5), vector_fixture(34, 6)];

        let results = run_local(2, |world| {
            let fmm = build(&world, &factory, &locals, &distribution);
            inputs
                .iter()
                .flat_map(|input| {
                    let owned = owned_slice(input, &distribution, &sizes, world.rank());
                    [
                        fmm.apply(&owned, Direction::Forward).unwrap(),
                        fmm.apply(&owned, Direction::Transpose).unwrap(),
                    ]
                })
                .collect_vec()
        });

        for (k, (input, direction)) in inputs
            .iter()
            .cartesian_product([Direction::Forward, Direction::Transpose])
            .enumerate()
        {
            let found = results.iter().map(|r| r[k].clone()).concat();
            let expected = factory.product(input, direction);
            assert_relative_eq!(max_error(&found, &expected), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_wrong_lengths() {
        let sizes = vec![6, 6];
        let factory = dense_fixture(&sizes, 7);
        let locals = classify(2, 0);
        let distribution = partition(2, 1).unwrap();

        run_local(1, |world| {
            let fmm = build(&world, &factory, &locals, &distribution);
            assert_eq!((fmm.rows(), fmm.cols()), (12, 12));

            let result = fmm.forward(&vector_fixture(11, 0));
            assert!(matches!(
                result,
                Err(FmmError::SizeMismatch {
                    expected: 12,
                    found: 11,
                    ..
                })
            ));

            let mut output = vec![c64::new(0.0, 0.0); 13];
            let result = fmm.apply_into(&vector_fixture(12, 0), &mut output, Direction::Forward);
            assert!(matches!(result, Err(FmmError::SizeMismatch { .. })));
        });
    }
}
