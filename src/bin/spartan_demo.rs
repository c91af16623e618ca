//! Small driver: builds a random array, runs a few compiled expressions and
//! a slice write, and prints the results.
//!
//! ```text
//! spartan_demo --rows 8 --cols 6 --workers 4 --tile-dim 3 --seed 7 --config spartan.toml
//! ```

use std::time::Instant;

use anyhow::Result;
use spartan_rs::config::{ArrayOverrides, ConfigOverrides, RuntimeOverrides};
use spartan_rs::extent::from_slice;
use spartan_rs::test_support::random_dense;
use spartan_rs::{from_numpy, write, Expr, LocalExpr, Master, SpartanConfig, TileData};
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn parse_num<T: std::str::FromStr>(flag: &str) -> Option<T> {
    parse_arg(flag).and_then(|v| v.parse().ok())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let rows: usize = parse_num("--rows").unwrap_or(8);
    let cols: usize = parse_num("--cols").unwrap_or(6);
    let seed: u64 = parse_num("--seed").unwrap_or(7);
    let overrides = ConfigOverrides {
        runtime: parse_num("--workers").map(|workers| RuntimeOverrides {
            workers: Some(workers),
            default_shards: Some(workers * 2),
            ..Default::default()
        }),
        array: parse_num("--tile-dim").map(|tile_dim| ArrayOverrides {
            tile_dim: Some(tile_dim),
        }),
        ..Default::default()
    };
    let config_path = parse_arg("--config");
    let config = SpartanConfig::load(config_path.as_deref(), overrides)?;

    let master = Master::start(config)?;
    println!(
        "=== spartan demo: {}x{} array, {} workers, tile_dim {} ===\n",
        rows,
        cols,
        master.num_workers(),
        master.config().array.tile_dim
    );

    let block = random_dense(&[rows, cols], seed);
    let a = from_numpy(&master, TileData::Dense(block))?;
    println!("{} tiles across table {}", a.tiles().len(), a.id());

    let start = Instant::now();
    let sums = Expr::array(a.clone()).sum(0).evaluate(&master)?;
    println!("sum(axis=0) in {:?}: {:?}", start.elapsed(), sums.glom()?.to_dense()?.data());

    let start = Instant::now();
    let argmin = Expr::array(a.clone()).argmin(1).evaluate(&master)?;
    println!("argmin(axis=1) in {:?}: {:?}", start.elapsed(), argmin.glom()?.to_dense()?.data());

    let scaled = Expr::array(a.clone()).multiply(2.0).add(1.0).evaluate(&master)?;
    let local = LocalExpr::compiled(
        "max(a, 0) + min(b, 0)",
        vec![LocalExpr::input("a"), LocalExpr::input("b")],
    );
    let mixed = spartan_rs::map_local(&master, &[("a", &a), ("b", &scaled)], &local)?;
    println!("compiled map produced {} cells", mixed.size());

    let half = rows / 2;
    write(&a, &[0..half, 0..cols], scaled.clone(), &[half..rows, 0..cols])?;
    let first_row = a.fetch(&from_slice(&[0..1], a.shape())?)?;
    println!("after write, row 0 = {:?}", first_row.to_dense()?.data());

    for array in [sums, argmin, scaled, mixed] {
        array.destroy()?;
    }
    println!("\n{} tables still live", master.num_tables());
    Ok(())
}
