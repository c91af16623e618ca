use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::array::{from_numpy, DistArray};
use crate::error::Result;
use crate::table::Master;
use crate::tile::{DType, DenseTile, SparseTile, TileData};

/// Dense block of uniform values in `[-100, 100)`.
pub fn random_dense(shape: &[usize], seed: u64) -> DenseTile {
    let mut rng = StdRng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    let data = (0..n).map(|_| rng.random_range(-100.0..100.0)).collect();
    DenseTile::new(shape.to_vec(), DType::F64, data).expect("shape matches data")
}

/// Dense block of small integers, so ties show up in argmin tests.
pub fn random_ints(shape: &[usize], max: i64, seed: u64) -> DenseTile {
    let mut rng = StdRng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    let data = (0..n).map(|_| rng.random_range(0..max) as f64).collect();
    DenseTile::new(shape.to_vec(), DType::I64, data).expect("shape matches data")
}

/// Sparse block with roughly `density * size` non-zero cells.
pub fn random_sparse(shape: &[usize], density: f64, seed: u64) -> SparseTile {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tile = SparseTile::new(shape.to_vec(), DType::F64);
    let n: usize = shape.iter().product();
    let strides = crate::tile::strides(shape);
    for flat in 0..n {
        if rng.random_bool(density) {
            let coord = strides
                .iter()
                .zip(shape)
                .map(|(s, d)| (flat / s) % d)
                .collect();
            tile.set(coord, rng.random_range(1.0..10.0));
        }
    }
    tile
}

/// A distributed copy of a random dense block.
pub fn random_array(master: &Master, shape: &[usize], seed: u64) -> Result<(DistArray, DenseTile)> {
    let block = random_dense(shape, seed);
    let array = from_numpy(master, TileData::Dense(block.clone()))?;
    Ok((array, block))
}
