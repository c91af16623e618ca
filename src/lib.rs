//! # Spartan
//!
//! A distributed tiled-array engine. Array expressions are compiled into
//! primitive map/reduce operations over tiles; tiles live in sharded
//! key/value tables and kernels are dispatched once per shard.
//!
//! ```no_run
//! use spartan_rs::{from_numpy, DType, DenseTile, Expr, Master, SpartanConfig, TileData};
//!
//! # fn main() -> spartan_rs::Result<()> {
//! let master = Master::start(SpartanConfig::default())?;
//! let block = DenseTile::from_fn(vec![4, 4], DType::F64, |i| (i[0] * 4 + i[1]) as f64);
//! let a = from_numpy(&master, TileData::Dense(block))?;
//! let column_sums = Expr::array(a).sum(0).evaluate(&master)?;
//! println!("{:?}", column_sums.glom()?);
//! # Ok(())
//! # }
//! ```

pub mod array;
pub mod config;
pub mod error;
pub mod extent;
pub mod local;
pub mod table;
pub mod tile;

#[doc(hidden)]
pub mod test_support;

// Re-export main types for convenience
pub use array::{
    compile, execute, from_file, from_numpy, map_local, write, BinaryOp, Constant, DistArray, Expr,
    FileType, MapKind, PrimitiveOp, ReduceKind, WriteData,
};
pub use config::{ConfigError, ConfigOverrides, SpartanConfig};
pub use error::{Error, Result};
pub use extent::Extent;
pub use local::codegen::{Backend, Codegen, CompiledFn, FunctionCompiler};
pub use local::{KwArg, Kwargs, LocalCtx, LocalExpr};
pub use table::{
    mod_sharder, replace_accum, sum_accum, Accumulator, FutureGroup, Kernel, Master, PendingUpdate,
    Selector, Sharder, Table, TableId, TableRef, TableState,
};
pub use tile::{DType, DenseTile, Field, SparseTile, StructuredTile, Tile, TileData};
