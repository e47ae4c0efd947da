//! Classification of scatterer pairs into local and non-local interactions
use super::types::InteractionMatrix;

/// Banded locality classification.
///
/// Pairs at index distance at most `bandwidth` are local. A negative bandwidth
/// makes every pair non-local, a bandwidth of at least `n` every pair local.
///
/// # Arguments
/// * `n` - Number of scatterers.
/// * `bandwidth` - Half width of the band around the diagonal.
pub fn classify(n: usize, bandwidth: i64) -> InteractionMatrix {
    if bandwidth < 0 {
        return InteractionMatrix::filled(n, false);
    }
    let bandwidth = bandwidth as usize;
    if bandwidth >= n {
        return InteractionMatrix::filled(n, true);
    }
    InteractionMatrix::from_fn(n, |i, j| i.abs_diff(j) <= bandwidth)
}
