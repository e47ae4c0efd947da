//! Kernels evaluating blocks of an explicitly assembled operator
use std::sync::Arc;

use itertools::izip;
use rayon::prelude::*;
use rlst::{Array, BaseArray, RlstScalar, Shape, VectorContainer};

use crate::{
    fmm::helpers::compact_offsets,
    topology::InteractionMatrix,
    traits::{
        kernel::{InteractionKernel, KernelFactory},
        types::{Direction, FmmError, Result},
    },
};

/// Alias for an rlst container holding a dense operator.
pub type DenseMatrix<T> = Array<T, BaseArray<T, VectorContainer<T>, 2>, 2>;

/// Factory for kernels reading from a dense operator of shape `[n, n]`, where
/// `n` is the sum of the block sizes.
#[derive(Clone)]
pub struct DenseInteraction<T: RlstScalar> {
    operator: Arc<DenseMatrix<T>>,
    sizes: Vec<usize>,
    offsets: Vec<usize>,
}

/// One output block of a dense kernel.
struct RowBlock {
    global: usize,
    size: usize,
    // (global offset, size, compact input offset) of each selected column
    columns: Vec<(usize, usize, usize)>,
}

/// Kernel over a selection of blocks of a dense operator.
pub struct DenseKernel<T: RlstScalar> {
    operator: Arc<DenseMatrix<T>>,
    direction: Direction,
    rows: Vec<RowBlock>,
    input_size: usize,
}

impl<T> DenseInteraction<T>
where
    T: RlstScalar,
{
    /// Wrap a dense operator partitioned into scatterer blocks.
    ///
    /// # Arguments
    /// * `operator` - Global operator, square.
    /// * `sizes` - Block size of each scatterer.
    pub fn new(operator: DenseMatrix<T>, sizes: Vec<usize>) -> Result<Self> {
        let n: usize = sizes.iter().sum();
        let [rows, cols] = operator.shape();
        if rows != n || cols != n {
            return Err(FmmError::SizeMismatch {
                what: "dense operator",
                expected: n,
                found: if rows != n { rows } else { cols },
            });
        }

        let offsets = sizes
            .iter()
            .scan(0, |offset, &size| {
                *offset += size;
                Some(*offset - size)
            })
            .collect();

        Ok(Self {
            operator: Arc::new(operator),
            sizes,
            offsets,
        })
    }

    /// Block size of each scatterer
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Global product with every block, used as a reference.
    pub fn product(&self, input: &[T], direction: Direction) -> Vec<T> {
        let n = input.len();
        (0..n)
            .into_par_iter()
            .map(|r| {
                let mut acc = T::zero();
                for (c, &x) in input.iter().enumerate() {
                    acc += entry(&self.operator, direction, r, c) * x;
                }
                acc
            })
            .collect()
    }

    fn kernel(&self, mask: &InteractionMatrix, direction: Direction) -> Result<DenseKernel<T>> {
        if mask.size() != self.sizes.len() {
            return Err(FmmError::SizeMismatch {
                what: "selection mask",
                expected: self.sizes.len(),
                found: mask.size(),
            });
        }

        let active_columns = mask.active_columns();
        let input_offsets = compact_offsets(&active_columns, &self.sizes);

        let rows = izip!(mask.active_rows(), &self.offsets, &self.sizes)
            .enumerate()
            .filter(|(_, (active, _, _))| *active)
            .map(|(i, (_, &global, &size))| RowBlock {
                global,
                size,
                columns: izip!(&input_offsets, &self.offsets, &self.sizes)
                    .enumerate()
                    .filter_map(|(j, (compact, &offset, &width))| match compact {
                        Some(compact) if mask.get(i, j) => Some((offset, width, *compact)),
                        _ => None,
                    })
                    .collect(),
            })
            .collect();

        Ok(DenseKernel {
            operator: self.operator.clone(),
            direction,
            rows,
            input_size: input_offsets
                .iter()
                .zip(&self.sizes)
                .filter(|(o, _)| o.is_some())
                .map(|(_, s)| s)
                .sum(),
        })
    }
}

fn entry<T: RlstScalar>(operator: &DenseMatrix<T>, direction: Direction, r: usize, c: usize) -> T {
    match direction {
        Direction::Forward => operator[[r, c]],
        Direction::Transpose => operator[[c, r]],
    }
}

impl<T> KernelFactory<T> for DenseInteraction<T>
where
    T: RlstScalar,
{
    type Kernel = DenseKernel<T>;

    fn forward(&self, mask: &InteractionMatrix) -> Result<Self::Kernel> {
        self.kernel(mask, Direction::Forward)
    }

    fn transpose(&self, mask: &InteractionMatrix) -> Result<Self::Kernel> {
        self.kernel(mask, Direction::Transpose)
    }
}

impl<T> InteractionKernel<T> for DenseKernel<T>
where
    T: RlstScalar,
{
    fn apply(&self, input: &[T]) -> Result<Vec<T>> {
        if input.len() != self.input_size {
            return Err(FmmError::SizeMismatch {
                what: "kernel input",
                expected: self.input_size,
                found: input.len(),
            });
        }

        Ok(self
            .rows
            .par_iter()
            .flat_map_iter(|row| {
                (row.global..row.global + row.size).map(move |r| {
                    let mut acc = T::zero();
                    for &(global, size, compact) in row.columns.iter() {
                        for k in 0..size {
                            acc += entry(&self.operator, self.direction, r, global + k)
                                * input[compact + k];
                        }
                    }
                    acc
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use rlst::{c64, rlst_dynamic_array2};

    use super::*;

    fn operator() -> DenseMatrix<f64> {
        // Entry (r, c) is 10 r + c
        let mut op = rlst_dynamic_array2!(f64, [5, 5]);
        for r in 0..5 {
            for c in 0..5 {
                op[[r, c]] = (10 * r + c) as f64;
            }
        }
        op
    }

    #[test]
    fn test_shape_mismatch() {
        let result = DenseInteraction::new(operator(), vec![2, 2]);
        assert!(matches!(result, Err(FmmError::SizeMismatch { .. })));
    }

    #[test]
    fn test_compact_evaluation() {
        // Blocks {0, 1}, {2}, {3, 4}
        let factory = DenseInteraction::new(operator(), vec![2, 1, 2]).unwrap();
        let mut mask = InteractionMatrix::filled(3, false);
        mask.set(0, 2, true);
        mask.set(2, 1, true);

        // Input holds columns of blocks 1 and 2, output rows of blocks 0 and 2
        let input = [1.0, 1.0, 2.0];
        let output = factory.forward(&mask).unwrap().apply(&input).unwrap();

        let row = |r: usize| 10. * r as f64;
        assert_eq!(
            output,
            vec![
                (row(0) + 3.) + 2. * (row(0) + 4.),
                (row(1) + 3.) + 2. * (row(1) + 4.),
                row(3) + 2.,
                row(4) + 2.,
            ]
        );
    }

    #[test]
    fn test_transpose_matches_global_product() {
        let mut op = rlst_dynamic_array2!(c64, [3, 3]);
        for r in 0..3 {
            for c in 0..3 {
                op[[r, c]] = c64::new(r as f64, c as f64 + 1.0);
            }
        }
        let factory = DenseInteraction::new(op, vec![1, 2]).unwrap();
        let mask = InteractionMatrix::filled(2, true);
        let input = vec![c64::new(1.0, 0.0), c64::new(0.0, 1.0), c64::new(2.0, -1.0)];

        for direction in [Direction::Forward, Direction::Transpose] {
            let kernel = match direction {
                Direction::Forward => factory.forward(&mask),
                Direction::Transpose => factory.transpose(&mask),
            }
            .unwrap();
            assert_eq!(kernel.apply(&input).unwrap(), factory.product(&input, direction));
        }
    }

    #[test]
    fn test_empty_mask() {
        let factory = DenseInteraction::new(operator(), vec![2, 1, 2]).unwrap();
        let kernel = factory.forward(&InteractionMatrix::filled(3, false)).unwrap();
        assert!(kernel.apply(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_mask_and_input() {
        let factory = DenseInteraction::new(operator(), vec![2, 1, 2]).unwrap();
        assert!(matches!(
            factory.transpose(&InteractionMatrix::filled(2, true)),
            Err(FmmError::SizeMismatch {
                what: "selection mask",
                ..
            })
        ));

        let kernel = factory.forward(&InteractionMatrix::filled(3, true)).unwrap();
        assert!(matches!(
            kernel.apply(&[1.0; 4]),
            Err(FmmError::SizeMismatch {
                what: "kernel input",
                expected: 5,
                found: 4
            })
        ));
    }
}
