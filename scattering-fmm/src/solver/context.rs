//! Process grid handles
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use log::{debug, warn};

use crate::traits::{
    solver::{GridBackend, GridInfo},
    types::{FmmError, Result},
};

/// Book-keeping shared by every grid context of a run.
///
/// Counts contexts the calling rank belongs to. Once finalized, grids are no
/// longer torn down when their last handle drops.
#[derive(Debug, Default)]
pub struct GridRegistry {
    live: AtomicUsize,
    finalized: AtomicBool,
}

impl GridRegistry {
    /// New registry with no live contexts
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of live contexts the calling rank belongs to
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Whether [`GridRegistry::finalize`] has been called
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Mark the grid layer as shut down. Fails while contexts are alive.
    pub fn finalize(&self) -> Result<()> {
        let live = self.live();
        if live > 0 {
            return Err(FmmError::InvalidParameter(format!(
                "cannot finalize with {} live grid contexts",
                live
            )));
        }
        self.finalized.store(true, Ordering::Release);
        Ok(())
    }

    fn increment(&self) {
        self.live.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Ownership {
    /// Grid created here, released when the last handle drops
    Owned,
    /// Grid managed elsewhere
    Borrowed,
}

struct Inner {
    info: GridInfo,
    ownership: Ownership,
    backend: Arc<dyn GridBackend>,
    registry: Arc<GridRegistry>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.info.is_valid() {
            return;
        }
        if self.ownership == Ownership::Owned {
            if self.registry.is_finalized() {
                warn!(
                    "grid {} outlived the grid registry, not released",
                    self.info.handle
                );
            } else {
                self.backend.grid_exit(self.info.handle);
            }
        }
        self.registry.decrement();
    }
}

/// Shared handle on a process grid.
///
/// Clones refer to the same grid. An owned grid is released when its last
/// handle drops.
#[derive(Clone)]
pub struct GridContext {
    inner: Arc<Inner>,
}

impl GridContext {
    fn wrap(
        info: GridInfo,
        ownership: Ownership,
        backend: Arc<dyn GridBackend>,
        registry: Arc<GridRegistry>,
    ) -> Self {
        if info.is_valid() {
            registry.increment();
        }
        Self {
            inner: Arc::new(Inner {
                info,
                ownership,
                backend,
                registry,
            }),
        }
    }

    /// Create a row-major `rows x cols` grid over the first ranks of the system.
    ///
    /// Ranks beyond the grid receive an invalid context.
    pub fn new(
        registry: Arc<GridRegistry>,
        backend: Arc<dyn GridBackend>,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        if rows * cols == 0 {
            return Err(FmmError::InvalidParameter("Context of size 0".to_string()));
        }
        if rows * cols > backend.system_size() {
            return Err(FmmError::InvalidParameter(format!(
                "grid of {}x{} larger than the {} available processes",
                rows,
                cols,
                backend.system_size()
            )));
        }
        if registry.is_finalized() {
            return Err(FmmError::InvalidParameter(
                "grid registry already finalized".to_string(),
            ));
        }

        let info = backend.grid_init(rows, cols);
        debug!(
            "rank {}: grid {} of {}x{}, position {:?}",
            backend.rank(),
            info.handle,
            rows,
            cols,
            info.row.zip(info.col)
        );
        Ok(Self::wrap(info, Ownership::Owned, backend, registry))
    }

    /// Wrap a grid created and released by someone else.
    pub fn borrowed(
        registry: Arc<GridRegistry>,
        backend: Arc<dyn GridBackend>,
        info: GridInfo,
    ) -> Self {
        Self::wrap(info, Ownership::Borrowed, backend, registry)
    }

    /// Create a grid over an explicit set of ranks, derived from this one.
    ///
    /// # Arguments
    /// * `gridmap` - Column-major `rows x cols` array of system ranks.
    /// * `rows` - Number of process rows.
    /// * `cols` - Number of process columns.
    pub fn sub_grid(&self, gridmap: &[usize], rows: usize, cols: usize) -> Result<Self> {
        let inner = &self.inner;
        if !self.is_valid() {
            return Ok(Self::borrowed(
                inner.registry.clone(),
                inner.backend.clone(),
                GridInfo::invalid(),
            ));
        }
        if rows * cols == 0 {
            return Err(FmmError::InvalidParameter("Context of size 0".to_string()));
        }
        if gridmap.len() != rows * cols {
            return Err(FmmError::SizeMismatch {
                what: "grid map",
                expected: rows * cols,
                found: gridmap.len(),
            });
        }

        let info = inner.backend.grid_map(&inner.info, gridmap, rows, cols);
        Ok(Self::wrap(
            info,
            Ownership::Owned,
            inner.backend.clone(),
            inner.registry.clone(),
        ))
    }

    /// Whether the calling rank belongs to the grid
    pub fn is_valid(&self) -> bool {
        self.inner.info.is_valid()
    }

    /// Backend handle
    pub fn handle(&self) -> i32 {
        self.inner.info.handle
    }

    /// Number of process rows
    pub fn rows(&self) -> usize {
        self.inner.info.rows
    }

    /// Number of process columns
    pub fn cols(&self) -> usize {
        self.inner.info.cols
    }

    /// Number of processes in the grid
    pub fn size(&self) -> usize {
        self.rows() * self.cols()
    }

    /// Row of the calling rank
    pub fn row(&self) -> Option<usize> {
        self.inner.info.row
    }

    /// Column of the calling rank
    pub fn col(&self) -> Option<usize> {
        self.inner.info.col
    }

    /// Number of processes in the system communicator
    pub fn system_size(&self) -> usize {
        self.inner.backend.system_size()
    }
}
