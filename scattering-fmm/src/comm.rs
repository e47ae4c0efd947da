//! Implementations of the graph communicator.
//!
//! [`local`] runs every rank as a thread of the current process and is used for
//! testing and for shared memory runs. [`mpi`] wraps an MPI distributed graph
//! topology and requires the `mpi` feature.
pub mod local;

#[cfg(feature = "mpi")]
pub mod mpi;

pub use local::{local_worlds, run_local, LocalGraphCommunicator, LocalRequest, LocalWorld};

#[cfg(feature = "mpi")]
pub use self::mpi::{MpiGraphCommunicator, MpiRequest};
