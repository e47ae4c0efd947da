//! Traits for the dense direct solve path
use crate::solver::GridContext;

use super::types::Result;

/// Description of a two dimensional process grid as reported by a grid backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridInfo {
    /// Backend handle of the grid
    pub handle: i32,
    /// Number of process rows
    pub rows: usize,
    /// Number of process columns
    pub cols: usize,
    /// Row coordinate of the calling rank, `None` if it is not part of the grid
    pub row: Option<usize>,
    /// Column coordinate of the calling rank, `None` if it is not part of the grid
    pub col: Option<usize>,
}

impl GridInfo {
    /// Grid record for a rank that takes part in no grid.
    pub fn invalid() -> Self {
        Self {
            handle: -1,
            rows: 0,
            cols: 0,
            row: None,
            col: None,
        }
    }

    /// Whether the calling rank belongs to the grid.
    pub fn is_valid(&self) -> bool {
        self.row.is_some() && self.col.is_some()
    }
}

/// Process grid bootstrap, e.g. BLACS.
pub trait GridBackend: Send + Sync {
    /// Rank of the calling process in the system communicator.
    fn rank(&self) -> usize;

    /// Number of processes in the system communicator.
    fn system_size(&self) -> usize;

    /// Create a row-major `rows x cols` grid over the first ranks of the system.
    fn grid_init(&self, rows: usize, cols: usize) -> GridInfo;

    /// Create a grid from an explicit map of ranks.
    ///
    /// # Arguments
    /// * `parent` - Grid whose system context the new grid derives from.
    /// * `ranks` - Column-major `rows x cols` array of system ranks.
    /// * `rows` - Number of process rows.
    /// * `cols` - Number of process columns.
    fn grid_map(&self, parent: &GridInfo, ranks: &[usize], rows: usize, cols: usize) -> GridInfo;

    /// Release a grid created by this backend.
    fn grid_exit(&self, handle: i32);
}

/// Broadcast from a rank inside a grid to every rank of the system communicator.
pub trait Broadcast<T> {
    /// Replace `data` on every rank with the copy held by `root`.
    fn broadcast(&self, data: &mut Vec<T>, root: usize) -> Result<()>;
}

/// Distributed dense linear solver, e.g. ScaLAPACK `p?gesv`.
pub trait DenseSolver<T> {
    /// Solve `A x = b` for the locally held blocks of `A` and `b`.
    ///
    /// Returns the solution gathered on the calling rank together with the
    /// solver status; any non-zero status signals a singular or failed solve.
    fn solve(&self, context: &GridContext, matrix: &[T], rhs: &[T]) -> (Vec<T>, i32);
}
