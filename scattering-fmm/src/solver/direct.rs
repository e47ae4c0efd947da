//! Direct solve driver
use log::debug;

use crate::traits::{
    solver::{Broadcast, DenseSolver},
    types::{FmmError, Result},
};

use super::GridContext;

/// Runs a distributed dense solver on the ranks of a grid and shares the
/// solution with the ranks outside of it.
pub struct DirectSolver<S, B> {
    context: GridContext,
    solver: S,
    broadcast: B,
}

impl<S, B> DirectSolver<S, B> {
    /// New driver
    ///
    /// # Arguments
    /// * `context` - Grid the dense solver runs on.
    /// * `solver` - Dense solver.
    /// * `broadcast` - Broadcast over the whole system communicator.
    pub fn new(context: GridContext, solver: S, broadcast: B) -> Self {
        Self {
            context,
            solver,
            broadcast,
        }
    }

    /// Grid the solver runs on
    pub fn context(&self) -> &GridContext {
        &self.context
    }

    /// Solve `A x = b`, returning `x` on every rank of the system.
    ///
    /// Collective over the system communicator. Ranks outside of the grid pass
    /// empty slices. The solution is broadcast from system rank 0, which is
    /// always part of a grid created with [`GridContext::new`].
    pub fn solve<T>(&self, matrix: &[T], rhs: &[T]) -> Result<Vec<T>>
    where
        S: DenseSolver<T>,
        B: Broadcast<T>,
    {
        let mut solution = Vec::new();

        if self.context.is_valid() {
            let (x, status) = self.solver.solve(&self.context, matrix, rhs);
            if status != 0 {
                return Err(FmmError::SingularSystem(status));
            }
            solution = x;
        }

        if self.context.size() != self.context.system_size() {
            debug!(
                "broadcasting solution to {} ranks outside of the grid",
                self.context.system_size() - self.context.size()
            );
            self.broadcast.broadcast(&mut solution, 0)?;
        }

        Ok(solution)
    }
}
