//! Graph communicator on an MPI distributed graph topology
use std::ffi::c_void;

use mpi::{
    ffi,
    raw::{AsRaw, FromRaw},
    topology::SimpleCommunicator,
    traits::{Communicator, Equivalence, Root},
};
use num::Zero;

use crate::traits::{
    comm::{ExchangeRequest, GraphCommunicator},
    solver::Broadcast,
    types::{FmmError, Result},
};

/// Neighbourhood communicator created with `MPI_Dist_graph_create_adjacent`.
pub struct MpiGraphCommunicator {
    rank: usize,
    neighbourhood: Vec<usize>,
    raw: SimpleCommunicator,
}

impl MpiGraphCommunicator {
    /// Collectively create a graph communicator over `neighbours`.
    ///
    /// The topology is symmetric, so neighbours are both sources and destinations.
    /// Ranks are not reordered.
    pub fn new(world: &SimpleCommunicator, neighbours: &[usize]) -> Result<Self> {
        let size = world.size() as usize;
        if let Some(&outside) = neighbours.iter().find(|&&n| n >= size) {
            return Err(FmmError::Topology(format!(
                "neighbour {} is outside of a world of {} ranks",
                outside, size
            )));
        }
        let ranks: Vec<i32> = neighbours.iter().map(|&n| n as i32).collect();

        let raw = unsafe {
            let mut raw_comm = ffi::RSMPI_COMM_NULL;
            let code = ffi::MPI_Dist_graph_create_adjacent(
                world.as_raw(),
                ranks.len() as i32,
                ranks.as_ptr(),
                ffi::RSMPI_UNWEIGHTED(),
                ranks.len() as i32,
                ranks.as_ptr(),
                ffi::RSMPI_UNWEIGHTED(),
                ffi::RSMPI_INFO_NULL,
                0,
                &mut raw_comm,
            );
            if code != 0 {
                return Err(FmmError::Communication(format!(
                    "MPI_Dist_graph_create_adjacent failed with code {}",
                    code
                )));
            }
            SimpleCommunicator::from_raw(raw_comm)
        };

        Ok(Self {
            rank: world.rank() as usize,
            neighbourhood: neighbours.to_vec(),
            raw,
        })
    }

    /// Rank of this process
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Ordered list of neighbour ranks
    pub fn neighbourhood(&self) -> &[usize] {
        &self.neighbourhood
    }
}

fn displacements(counts: &[i32]) -> Vec<i32> {
    counts
        .iter()
        .scan(0, |offset, &count| {
            let displacement = *offset;
            *offset += count;
            Some(displacement)
        })
        .collect()
}

fn to_i32(counts: &[usize]) -> Result<Vec<i32>> {
    counts
        .iter()
        .map(|&c| {
            i32::try_from(c).map_err(|_| {
                FmmError::Communication(format!("message of {} elements exceeds MPI counts", c))
            })
        })
        .collect()
}

/// Pending `MPI_Ineighbor_alltoallv`, owning both buffers until completion.
pub struct MpiRequest<T> {
    raw: ffi::MPI_Request,
    completed: bool,
    _send: Vec<T>,
    receive: Vec<T>,
    _counts: [Vec<i32>; 4],
}

impl<T> GraphCommunicator<T> for MpiGraphCommunicator
where
    T: Equivalence + Zero + Clone,
{
    type Request = MpiRequest<T>;

    fn rank(&self) -> usize {
        MpiGraphCommunicator::rank(self)
    }

    fn neighbourhood(&self) -> &[usize] {
        MpiGraphCommunicator::neighbourhood(self)
    }

    fn exchange(
        &self,
        send: Vec<T>,
        send_counts: &[usize],
        receive_counts: &[usize],
    ) -> Result<Self::Request> {
        for (what, counts) in [("send counts", send_counts), ("receive counts", receive_counts)] {
            if counts.len() != self.neighbourhood.len() {
                return Err(FmmError::SizeMismatch {
                    what,
                    expected: self.neighbourhood.len(),
                    found: counts.len(),
                });
            }
        }
        let total: usize = send_counts.iter().sum();
        if total != send.len() {
            return Err(FmmError::SizeMismatch {
                what: "send buffer",
                expected: total,
                found: send.len(),
            });
        }

        let send_counts = to_i32(send_counts)?;
        let receive_counts = to_i32(receive_counts)?;
        let send_displacements = displacements(&send_counts);
        let receive_displacements = displacements(&receive_counts);
        let mut receive = vec![T::zero(); receive_counts.iter().map(|&c| c as usize).sum()];
        let datatype = T::equivalent_datatype();

        let mut raw = unsafe { ffi::RSMPI_REQUEST_NULL };
        let code = unsafe {
            ffi::MPI_Ineighbor_alltoallv(
                send.as_ptr() as *const c_void,
                send_counts.as_ptr(),
                send_displacements.as_ptr(),
                datatype.as_raw(),
                receive.as_mut_ptr() as *mut c_void,
                receive_counts.as_ptr(),
                receive_displacements.as_ptr(),
                datatype.as_raw(),
                self.raw.as_raw(),
                &mut raw,
            )
        };
        if code != 0 {
            return Err(FmmError::Communication(format!(
                "MPI_Ineighbor_alltoallv failed with code {}",
                code
            )));
        }

        Ok(MpiRequest {
            raw,
            completed: false,
            _send: send,
            receive,
            _counts: [
                send_counts,
                send_displacements,
                receive_counts,
                receive_displacements,
            ],
        })
    }
}

impl<T> MpiRequest<T> {
    fn complete(&mut self) -> Result<()> {
        if self.completed {
            return Ok(());
        }
        self.completed = true;
        let code = unsafe {
            let mut status: ffi::MPI_Status = std::mem::zeroed();
            ffi::MPI_Wait(&mut self.raw, &mut status)
        };
        if code != 0 {
            return Err(FmmError::Communication(format!(
                "MPI_Wait failed with code {}",
                code
            )));
        }
        Ok(())
    }
}

impl<T> ExchangeRequest<T> for MpiRequest<T> {
    fn wait(mut self) -> Result<Vec<T>> {
        self.complete()?;
        Ok(std::mem::take(&mut self.receive))
    }
}

impl<T> Drop for MpiRequest<T> {
    // MPI may still write into the receive buffer
    fn drop(&mut self) {
        let _ = self.complete();
    }
}

impl<T> Broadcast<T> for SimpleCommunicator
where
    T: Equivalence + Zero + Clone,
{
    fn broadcast(&self, data: &mut Vec<T>, root: usize) -> Result<()> {
        let root = self.process_at_rank(root as i32);
        let mut len = data.len() as u64;
        root.broadcast_into(&mut len);
        data.resize(len as usize, T::zero());
        root.broadcast_into(&mut data[..]);
        Ok(())
    }
}
