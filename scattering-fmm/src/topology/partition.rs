//! Assignment of scatterers to processes
use crate::traits::types::{FmmError, Result};

use super::types::Distribution;

/// Contiguous, count balanced distribution of `n` scatterers over `nprocs` ranks.
///
/// Only the first `min(n, nprocs)` ranks receive scatterers; of those, the
/// first `n mod min(n, nprocs)` get one more than the rest.
pub fn partition(n: usize, nprocs: usize) -> Result<Distribution> {
    if nprocs == 0 {
        return Err(FmmError::InvalidParameter(
            "cannot distribute scatterers over zero processes".to_string(),
        ));
    }

    let n_active = n.min(nprocs);
    let mut owners = vec![0; n];
    if n_active > 0 {
        let divided = n / n_active;
        let remainder = n % n_active;
        for rank in 0..n_active {
            let start = divided * rank + remainder.min(rank);
            let size = divided + usize::from(remainder > rank);
            owners[start..start + size].fill(rank);
        }
    }

    Distribution::from_owners(owners, nprocs)
}
