use spartan_rs::{DenseTile, Master, SpartanConfig, TileData};

#[allow(dead_code)]
pub fn master(workers: usize, tile_dim: usize) -> Master {
    Master::start(SpartanConfig::for_tests(workers, tile_dim)).expect("master starts")
}

#[allow(dead_code)]
pub fn dense(data: &TileData) -> DenseTile {
    data.to_dense().expect("numeric block")
}

#[allow(dead_code)]
pub fn assert_close(actual: &DenseTile, expected: &DenseTile) {
    assert_eq!(actual.shape(), expected.shape(), "shape");
    for (i, (a, e)) in actual.data().iter().zip(expected.data()).enumerate() {
        assert!(
            (a - e).abs() <= 1e-9 * e.abs().max(1.0),
            "cell {i}: got {a}, expected {e}"
        );
    }
}
