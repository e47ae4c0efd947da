//! Data structures describing how scatterers interact and where they live
use std::collections::BTreeSet;

use crate::traits::types::{FmmError, Result};

/// Square boolean matrix over scatterer pairs, stored row-major.
///
/// Entry `(i, j)` set means scatterer `j` contributes to scatterer `i` through
/// the local path. Unset entries go through the non-local path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionMatrix {
    pub(crate) n: usize,
    pub(crate) data: Vec<bool>,
}

impl InteractionMatrix {
    /// Matrix with every entry set to `value`.
    pub fn filled(n: usize, value: bool) -> Self {
        Self {
            n,
            data: vec![value; n * n],
        }
    }

    /// Build a matrix from a predicate over `(row, column)`.
    pub fn from_fn<F: Fn(usize, usize) -> bool>(n: usize, f: F) -> Self {
        let mut data = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                data.push(f(i, j));
            }
        }
        Self { n, data }
    }

    /// Number of scatterers.
    pub fn size(&self) -> usize {
        self.n
    }

    /// Entry `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> bool {
        self.data[i * self.n + j]
    }

    /// Set entry `(i, j)`.
    pub fn set(&mut self, i: usize, j: usize, value: bool) {
        self.data[i * self.n + j] = value;
    }

    /// Transposed matrix.
    pub fn transpose(&self) -> Self {
        Self::from_fn(self.n, |i, j| self.get(j, i))
    }

    /// Elementwise negation, swapping local and non-local pairs.
    pub fn complement(&self) -> Self {
        Self {
            n: self.n,
            data: self.data.iter().map(|&x| !x).collect(),
        }
    }

    /// Elementwise conjunction with a predicate over `(row, column)`.
    pub fn select<F: Fn(usize, usize) -> bool>(&self, f: F) -> Self {
        Self::from_fn(self.n, |i, j| self.get(i, j) && f(i, j))
    }

    /// For each row, whether it holds at least one set entry.
    pub fn active_rows(&self) -> Vec<bool> {
        self.data.chunks(self.n.max(1)).map(|row| row.iter().any(|&x| x)).collect()
    }

    /// For each column, whether it holds at least one set entry.
    pub fn active_columns(&self) -> Vec<bool> {
        (0..self.n)
            .map(|j| (0..self.n).any(|i| self.get(i, j)))
            .collect()
    }

    /// Iterator over the coordinates of set entries, row by row.
    pub fn nonzeros(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &x)| x)
            .map(move |(index, _)| (index / self.n, index % self.n))
    }

    /// Number of set entries.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&x| x).count()
    }
}

/// Assignment of each scatterer to the rank that owns its unknowns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Distribution {
    pub(crate) owners: Vec<usize>,
    pub(crate) nprocs: usize,
}

impl Distribution {
    /// Wrap an explicit owner map, checking that every owner is one of the
    /// `nprocs` ranks.
    pub fn from_owners(owners: Vec<usize>, nprocs: usize) -> Result<Self> {
        if nprocs == 0 {
            return Err(FmmError::InvalidParameter(
                "cannot distribute scatterers over zero processes".to_string(),
            ));
        }
        if let Some((i, owner)) = owners.iter().enumerate().find(|&(_, &owner)| owner >= nprocs) {
            return Err(FmmError::InvalidParameter(format!(
                "scatterer {} is assigned to rank {}, outside of {} ranks",
                i, owner, nprocs
            )));
        }
        Ok(Self { owners, nprocs })
    }

    /// Number of scatterers.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether there are no scatterers.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Total number of ranks, including ranks that own nothing.
    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    /// Owner of scatterer `i`.
    pub fn owner(&self, i: usize) -> usize {
        self.owners[i]
    }

    /// Owner of every scatterer, in index order.
    pub fn owners(&self) -> &[usize] {
        &self.owners
    }

    /// Mask of the scatterers owned by `rank`.
    pub fn owned_by(&self, rank: usize) -> Vec<bool> {
        self.owners.iter().map(|&owner| owner == rank).collect()
    }

    /// Number of scatterers owned by `rank`.
    pub fn count(&self, rank: usize) -> usize {
        self.owners.iter().filter(|&&owner| owner == rank).count()
    }
}

/// Neighbour ranks of every rank, indexed by rank.
pub type CommunicationGraph = Vec<BTreeSet<usize>>;
