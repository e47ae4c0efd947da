//! Gathering the inputs of non-local interactions from neighbouring ranks
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
    helpers::{check_dimensions, compact_offsets, selected_size},
    segment::SegmentMap,
    types::DistributeInput,
};

/// Columns whose input a rank needs: some row owned by `rank` has an allowed pair with them.
pub(crate) fn required_inputs(
    allowed: &InteractionMatrix,
    distribution: &Distribution,
    rank: usize,
) -> Vec<bool> {
    allowed
        .select(|i, _| distribution.owner(i) == rank)
        .active_columns()
}

impl<T, C> DistributeInput<T, C>
where
    T: RlstScalar,
    C: GraphCommunicator<T>,
{
    /// Precompute the exchange for a given selection of pairs.
    ///
    /// # Arguments
    /// * `communicator` - Neighbourhood communicator connecting ranks that share allowed pairs.
    /// * `allowed` - Pairs `(i, j)` evaluated on the owner of `i` with the input of `j`.
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

        let owned = distribution.owned_by(rank);
        let owned_offsets = compact_offsets(&owned, sizes);

        // Inputs required for this rank's evaluations, laid out in index order
        let local_inputs = required_inputs(allowed, distribution, rank);
        let synthesis_offsets = compact_offsets(&local_inputs, sizes);
        let synthesis_size = selected_size(&local_inputs, sizes);

        let mut receive_counts = Vec::with_capacity(neighbourhood.len());
        let mut send_counts = Vec::with_capacity(neighbourhood.len());
        let mut relocate_receive = SegmentMap::new();
        let mut relocate_send = SegmentMap::new();
        let mut received = vec![false; sizes.len()];
        let (mut receive_location, mut send_location) = (0, 0);

        for &neighbour in neighbourhood.iter() {
            // Data sent from the neighbour, reconstructed into the synthesised input
            let neighbour_owned = distribution.owned_by(neighbour);
            let mut count = 0;
            for (j, offset) in synthesis_offsets.iter().enumerate() {
                if let (true, Some(offset)) = (neighbour_owned[j], offset) {
                    relocate_receive.push(sizes[j], receive_location + count, *offset);
                    count += sizes[j];
                    received[j] = true;
                }
            }
            receive_counts.push(count);
            receive_location += count;

            // Data the neighbour's evaluations require from this rank
            let neighbour_inputs = required_inputs(allowed, distribution, neighbour);
            let mut count = 0;
            for (j, offset) in owned_offsets.iter().enumerate() {
                if let (true, Some(offset)) = (neighbour_inputs[j], offset) {
                    relocate_send.push(sizes[j], *offset, send_location + count);
                    count += sizes[j];
                }
            }
            send_counts.push(count);
            send_location += count;
        }

        if let Some(j) = izip!(&local_inputs, &received).position(|(&needed, &got)| needed && !got)
        {
            return Err(FmmError::Topology(format!(
                "rank {} needs the input of scatterer {} owned by rank {}, which is not a neighbour",
                rank,
                j,
                distribution.owner(j)
            )));
        }

        debug!(
            "rank {}: distribute plan with {} neighbours, receiving {} and sending {} elements",
            rank,
            neighbourhood.len(),
            receive_location,
            send_location
        );

        Ok(Self {
            communicator,
            receive_counts,
            send_counts,
            relocate_send,
            relocate_receive,
            synthesis_size,
            _marker: PhantomData,
        })
    }

    /// Pack the owned input and issue the non-blocking exchange.
    ///
    /// # Arguments
    /// * `input` - Input vector over the blocks owned by this rank.
    pub fn send(&self, input: &[T]) -> Result<C::Request> {
        let message_size = self.send_counts.iter().sum();
        let buffer = self.relocate_send.gather(input, message_size);
        self.communicator
            .exchange(buffer, &self.send_counts, &self.receive_counts)
    }

    /// Lay out received data as the input vector of the non-local kernel.
    pub fn synthesize(&self, received: &[T]) -> Vec<T> {
        self.relocate_receive.gather(received, self.synthesis_size)
    }
}
