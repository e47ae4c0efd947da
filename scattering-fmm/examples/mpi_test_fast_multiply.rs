//? mpirun -n {{NPROCESSES}} --features "mpi"

#[cfg(feature = "mpi")]
fn main() {
    use std::sync::Arc;

    use mpi::traits::Communicator;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rlst::{c64, rlst_dynamic_array2};
    use scattering_fmm::{
        comm::MpiGraphCommunicator,
        fmm::{helpers::ncoeffs_scatterer, neighbourhood_graphs},
        kernel::DenseInteraction,
        topology::{classify, partition},
        Direction, FastMatrixMultiplyBuilder,
    };

    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank() as usize;
    let nprocs = world.size() as usize;

    // Same operator and input on every rank
    let n_scatterers = 3 * nprocs + 1;
    let sizes = (0..n_scatterers)
        .map(|i| ncoeffs_scatterer(1 + i % 2))
        .collect::<Vec<_>>();
    let n: usize = sizes.iter().sum();
    let mut rng = StdRng::seed_from_u64(0);
    let mut operator = rlst_dynamic_array2!(c64, [n, n]);
    for r in 0..n {
        for c in 0..n {
            operator[[r, c]] = c64::new(rng.gen(), rng.gen());
        }
    }
    let input: Vec<c64> = (0..n).map(|_| c64::new(rng.gen(), rng.gen())).collect();
    let factory = DenseInteraction::new(operator, sizes.clone()).unwrap();

    let distribution = partition(n_scatterers, nprocs).unwrap();

    // Ownership is contiguous, so the owned blocks form one range of the global vector
    let offsets = sizes
        .iter()
        .scan(0, |offset, &size| {
            *offset += size;
            Some(*offset - size)
        })
        .collect::<Vec<_>>();
    let owned = (0..n_scatterers)
        .filter(|&i| distribution.owner(i) == rank)
        .collect::<Vec<_>>();
    let range = match (owned.first(), owned.last()) {
        (Some(&first), Some(&last)) => offsets[first]..offsets[last] + sizes[last],
        _ => 0..0,
    };

    for bandwidth in [-1, 0, 1, 3] {
        let locals = classify(n_scatterers, bandwidth);
        let (distribute, reduce) = neighbourhood_graphs(&locals, &distribution).unwrap();
        let distribute = distribute[rank].iter().copied().collect::<Vec<_>>();
        let reduce = reduce[rank].iter().copied().collect::<Vec<_>>();

        let fmm = FastMatrixMultiplyBuilder::new()
            .sizes(sizes.clone())
            .unwrap()
            .locals(locals)
            .distribution(distribution.clone())
            .communicators(
                Arc::new(MpiGraphCommunicator::new(&world, &distribute).unwrap()),
                Arc::new(MpiGraphCommunicator::new(&world, &reduce).unwrap()),
            )
            .kernels(factory.clone())
            .build()
            .unwrap();

        for direction in [Direction::Forward, Direction::Transpose] {
            let found = fmm.apply(&input[range.clone()], direction).unwrap();
            let expected = factory.product(&input, direction);
            let error = found
                .iter()
                .zip(&expected[range.clone()])
                .map(|(a, b)| (a - b).norm())
                .fold(0.0, f64::max);
            assert!(
                error < 1e-10,
                "rank {rank}: bandwidth {bandwidth}, {direction:?} error {error}"
            );
        }
    }

    if rank == 0 {
        println!("...test_fast_multiply passed");
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
