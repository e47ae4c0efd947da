//! Helper Functions
use itertools::izip;

use crate::{
    topology::{Distribution, InteractionMatrix},
    traits::types::{FmmError, Result},
};

use super::types::Scatterer;

/// Number of multipole coefficients of a scatterer for a given expansion order,
/// counting both the TE and TM families.
///
/// # Arguments
/// * `expansion_order` - Maximum degree of the expansion
pub fn ncoeffs_scatterer(expansion_order: usize) -> usize {
    2 * expansion_order * (expansion_order + 2)
}

/// Block size of every scatterer, in index order.
pub fn block_sizes(scatterers: &[Scatterer]) -> Vec<usize> {
    scatterers
        .iter()
        .map(|s| ncoeffs_scatterer(s.expansion_order))
        .collect()
}

/// Offset of each selected block in the compact vector holding only the selected
/// blocks in index order. Unselected entries are `None`.
pub fn compact_offsets(selected: &[bool], sizes: &[usize]) -> Vec<Option<usize>> {
    let mut offset = 0;
    izip!(selected, sizes)
        .map(|(&s, &size)| {
            if s {
                offset += size;
                Some(offset - size)
            } else {
                None
            }
        })
        .collect()
}

/// Total length of the selected blocks.
pub fn selected_size(selected: &[bool], sizes: &[usize]) -> usize {
    izip!(selected, sizes)
        .filter(|&(&s, _)| s)
        .map(|(_, &size)| size)
        .sum()
}

/// Check that a pair selection, a distribution and block sizes describe the same scatterers.
pub fn check_dimensions(
    matrix: &InteractionMatrix,
    distribution: &Distribution,
    sizes: &[usize],
) -> Result<()> {
    if matrix.size() != distribution.len() {
        return Err(FmmError::SizeMismatch {
            what: "interaction matrix",
            expected: distribution.len(),
            found: matrix.size(),
        });
    }
    if sizes.len() != distribution.len() {
        return Err(FmmError::SizeMismatch {
            what: "block sizes",
            expected: distribution.len(),
            found: sizes.len(),
        });
    }
    Ok(())
}

/// Random dense problem fixture for testing, with entries uniformly sampled in
/// the unit square of the complex plane.
///
/// # Arguments
/// * `sizes` - Block size of each scatterer.
/// * `seed` - Random seed.
#[cfg(test)]
pub(crate) fn dense_fixture(
    sizes: &[usize],
    seed: u64,
) -> crate::kernel::DenseInteraction<rlst::c64> {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let n = sizes.iter().sum();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut operator = rlst::rlst_dynamic_array2!(rlst::c64, [n, n]);
    for r in 0..n {
        for c in 0..n {
            operator[[r, c]] = rlst::c64::new(rng.gen(), rng.gen());
        }
    }
    crate::kernel::DenseInteraction::new(operator, sizes.to_vec()).unwrap()
}

/// Random vector fixture for testing.
#[cfg(test)]
pub(crate) fn vector_fixture(n: usize, seed: u64) -> Vec<rlst::c64> {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| rlst::c64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5))
        .collect()
}
