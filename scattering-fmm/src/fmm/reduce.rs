//! Routing partial results to the ranks that own them
use std::{marker::PhantomData, sync::Arc};

use itertools::izip;
use log::debug;
use rlst::RlstScalar;

use crate::{
    topology::{Distribution, InteractionMatrix},
    traits::{
        comm::GraphCommunicator,
        types::{FmmError, Result},
    },
};

use super::{
    helpers::{check_dimensions, compact_offsets},
    segment::SegmentMap,
    types::ReduceComputation,
};

/// Rows a rank computes contributions for: some column owned by `rank` has an
/// allowed pair with them.
pub(crate) fn produced_outputs(
    allowed: &InteractionMatrix,
    distribution: &Distribution,
    rank: usize,
) -> Vec<bool> {
    allowed
        .select(|_, j| distribution.owner(j) == rank)
        .active_rows()
}

impl<T, C> ReduceComputation<T, C>
where
    T: RlstScalar,
    C: GraphCommunicator<T>,
{
    /// Precompute the exchange for a given selection of pairs.
    ///
    /// # Arguments
    /// * `communicator` - Neighbourhood communicator connecting ranks that share allowed pairs.
    /// * `allowed` - Pairs `(i, j)` evaluated on the owner of `j`, contributing to `i`.
    /// * `distribution` - Owner of each scatterer.
    /// * `sizes` - Block size of each scatterer.
    pub fn new(
        communicator: Arc<C>,
        allowed: &InteractionMatrix,
        distribution: &Distribution,
        sizes: &[usize],
    ) -> Result<Self> {
        check_dimensions(allowed, distribution, sizes)?;
        let rank = communicator.rank();
        let neighbourhood = communicator.neighbourhood();

        let owned_offsets = compact_offsets(&distribution.owned_by(rank), sizes);
        let produced = produced_outputs(allowed, distribution, rank);
        let partial_offsets = compact_offsets(&produced, sizes);

        let mut send_counts = Vec::with_capacity(neighbourhood.len());
        let mut receive_counts = Vec::with_capacity(neighbourhood.len());
        let mut relocate_send = SegmentMap::new();
        let mut relocate_receive = SegmentMap::new();
        let mut routed = vec![false; sizes.len()];
        let (mut send_location, mut receive_location) = (0, 0);

        for &neighbour in neighbourhood.iter() {
            // Partial results owned by the neighbour
            let mut count = 0;
            for (i, offset) in partial_offsets.iter().enumerate() {
                if let (true, Some(offset)) = (distribution.owner(i) == neighbour, offset) {
                    relocate_send.push(sizes[i], *offset, send_location + count);
                    count += sizes[i];
                    routed[i] = true;
                }
            }
            send_counts.push(count);
            send_location += count;

            // Partial results computed by the neighbour for rows owned here
            let neighbour_outputs = produced_outputs(allowed, distribution, neighbour);
            let mut count = 0;
            for (i, offset) in owned_offsets.iter().enumerate() {
                if let (true, Some(offset)) = (neighbour_outputs[i], offset) {
                    relocate_receive.push(sizes[i], receive_location + count, *offset);
                    count += sizes[i];
                }
            }
            receive_counts.push(count);
            receive_location += count;
        }

        if let Some(i) = izip!(&produced, &routed).position(|(&computed, &sent)| computed && !sent) {
            return Err(FmmError::Topology(format!(
                "rank {} computes a contribution to scatterer {} owned by rank {}, which is not a neighbour",
                rank,
                i,
                distribution.owner(i)
            )));
        }

        debug!(
            "rank {}: reduction plan with {} neighbours, sending {} and receiving {} elements",
            rank,
            neighbourhood.len(),
            send_location,
            receive_location
        );

        Ok(Self {
            communicator,
            send_counts,
            receive_counts,
            relocate_send,
            relocate_receive,
            message_size: send_location,
            _marker: PhantomData,
        })
    }

    /// Pack partial results and issue the non-blocking exchange.
    ///
    /// # Arguments
    /// * `partials` - Contributions to the rows computed by this rank, in index order.
    pub fn send(&self, partials: &[T]) -> Result<C::Request> {
        let buffer = self.relocate_send.gather(partials, self.message_size);
        self.communicator
            .exchange(buffer, &self.send_counts, &self.receive_counts)
    }

    /// Add received contributions onto the owned output vector.
    pub fn reduce(&self, output: &mut [T], received: &[T]) {
        self.relocate_receive.add(received, output);
    }
}

#[cfg(test)]
mod test {
    use crate::{
        comm::{local_worlds, run_local},
        topology::{classify, graph_edges, partition},
        traits::comm::ExchangeRequest,
    };

    use super::*;

    fn ring(n: usize) -> InteractionMatrix {
        InteractionMatrix::from_fn(n, |i, j| (i + n - j) % n <= 1 || (j + n - i) % n <= 1)
    }

    #[test]
    fn test_ring_reduction() {
        // One scatterer per rank, each receiving from itself and both ring neighbours
        let nprocs = 4;
        let allowed = ring(nprocs);
        let distribution = partition(nprocs, nprocs).unwrap();
        let sizes = [2; 4];
        let graph = graph_edges(&allowed, &distribution).unwrap();

        let results = run_local(nprocs, |world| {
            let rank = world.rank();
            let comm = world.graph(graph[rank].iter().copied()).unwrap();
            let plan =
                ReduceComputation::new(Arc::new(comm), &allowed, &distribution, &sizes).unwrap();

            // Contribution of `rank` to row `i` is 10 rank + i, in both entries of the block
            let partials: Vec<f64> = produced_outputs(&allowed, &distribution, rank)
                .iter()
                .enumerate()
                .filter(|&(_, &produced)| produced)
                .flat_map(|(i, _)| [(10 * rank + i) as f64; 2])
                .collect();

            let received = plan.send(&partials).unwrap().wait().unwrap();
            let mut output = vec![0.0; 2];
            plan.reduce(&mut output, &received);
            output
        });

        for (rank, output) in results.iter().enumerate() {
            let expected: f64 = [(rank + nprocs - 1) % nprocs, rank, (rank + 1) % nprocs]
                .iter()
                .map(|&producer| (10 * producer + rank) as f64)
                .sum();
            assert_eq!(output, &vec![expected; 2]);
        }
    }

    #[test]
    fn test_counts() {
        // Upper bidiagonal pairs over three ranks with uneven ownership
        let allowed = InteractionMatrix::from_fn(5, |i, j| j == i || j == i + 1);
        let distribution = partition(5, 3).unwrap();
        let sizes = [1, 2, 3, 4, 5];
        let graph = graph_edges(&allowed, &distribution).unwrap();

        let plans: Vec<ReduceComputation<f64, _>> = local_worlds(3)
            .into_iter()
            .map(|world| {
                let comm = world.graph(graph[world.rank()].iter().copied()).unwrap();
                ReduceComputation::new(Arc::new(comm), &allowed, &distribution, &sizes).unwrap()
            })
            .collect();

        // Owners are {0, 0, 1, 1, 2}; rank 1 computes row 1 for rank 0 and
        // rank 2 computes row 3 for rank 1
        assert_eq!(plans[0].communicator.neighbourhood(), &[0, 1]);
        assert_eq!(plans[0].send_counts, vec![3, 0]);
        assert_eq!(plans[0].receive_counts, vec![3, 2]);
        assert_eq!(plans[1].communicator.neighbourhood(), &[0, 1, 2]);
        assert_eq!(plans[1].send_counts, vec![2, 7, 0]);
        assert_eq!(plans[1].receive_counts, vec![0, 7, 4]);
        assert_eq!(plans[2].send_counts, vec![4, 5]);
        assert_eq!(plans[2].receive_counts, vec![0, 5]);
        assert_eq!(plans[2].message_size, 9);
    }

    #[test]
    fn test_disjoint_partition() {
        let distribution = partition(6, 3).unwrap();
        let allowed =
            InteractionMatrix::from_fn(6, |i, j| distribution.owner(i) == distribution.owner(j));
        let graph = graph_edges(&allowed, &distribution).unwrap();

        for world in local_worlds(3) {
            let rank = world.rank();
            let comm = world.graph(graph[rank].iter().copied()).unwrap();
            let plan: ReduceComputation<f64, _> =
                ReduceComputation::new(Arc::new(comm), &allowed, &distribution, &[3; 6]).unwrap();
            assert_eq!(plan.communicator.neighbourhood(), &[rank]);
            assert_eq!(plan.send_counts, vec![6]);
            assert_eq!(plan.receive_counts, vec![6]);
        }
    }

    #[test]
    fn test_missing_neighbour() {
        // Rank 0 computes contributions to rows owned by rank 1
        let allowed = classify(4, 3);
        let distribution = partition(4, 2).unwrap();
        let world = local_worlds(2).remove(0);
        let comm = world.graph([0]).unwrap();

        let result =
            ReduceComputation::<f64, _>::new(Arc::new(comm), &allowed, &distribution, &[1; 4]);
        assert!(matches!(result, Err(FmmError::Topology(_))));
    }
}
