//! # Array Module
//!
//! Tiled distributed arrays. A [`DistArray`] splits its shape into extents of
//! at most `tile_dim` cells per axis and stores one [`Tile`] per extent in a
//! `Table<Extent, Tile>`. Tiles are created lazily: a tile that was never
//! written reads as zeros, and a partial write stores only the written region
//! until more of the tile arrives.
//!
//! ```text
//!   expr ──compile──► PrimitiveOp ──eval──► DistArray
//!                                             │
//!                         Table<Extent, Tile> (sharded by extent)
//! ```

pub mod compile;
pub mod eval;
pub mod expr;
pub mod prims;
pub mod write;

pub use compile::compile;
pub use eval::{execute, map_local};
pub use expr::Expr;
pub use prims::{BinaryOp, Constant, MapKind, PrimitiveOp, ReduceKind};
pub use write::{from_file, from_numpy, write, FileType, WriteData};

use crate::error::{Error, Result};
use crate::extent::Extent;
use crate::table::{
    mod_sharder, Accumulator, FutureGroup, Kernel, Master, Table, TableId, TableState,
};
use crate::tile::{DType, Tile, TileData};
use std::fmt;
use std::sync::Arc;

/// Accumulator of array tables: paint incoming regions over stored tiles.
pub fn paint_accum() -> Accumulator<Tile> {
    Arc::new(|current: &mut Tile, incoming: Tile| Ok(current.paint(incoming)?))
}

/// A distributed n-dimensional array.
#[derive(Clone)]
pub struct DistArray {
    table: Table<Extent, Tile>,
    shape: Vec<usize>,
    dtype: DType,
    sparse: bool,
    tiles: Arc<Vec<Extent>>,
}

impl PartialEq for DistArray {
    fn eq(&self, other: &Self) -> bool {
        self.table.id() == other.table.id()
    }
}

impl fmt::Debug for DistArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistArray")
            .field("table", &self.table.id())
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("sparse", &self.sparse)
            .field("tiles", &self.tiles.len())
            .finish()
    }
}

impl DistArray {
    /// Allocate an empty array of `shape`.
    pub fn ndarray(master: &Master, shape: &[usize], dtype: DType, sparse: bool) -> Result<Self> {
        let table = master.create_table(mod_sharder(), paint_accum(), None)?;
        Ok(Self::from_table(table, shape, dtype, sparse, master.config().array.tile_dim))
    }

    pub(crate) fn from_table(
        table: Table<Extent, Tile>,
        shape: &[usize],
        dtype: DType,
        sparse: bool,
        tile_dim: usize,
    ) -> Self {
        Self {
            table,
            shape: shape.to_vec(),
            dtype,
            sparse,
            tiles: Arc::new(Extent::split(shape, tile_dim)),
        }
    }

    pub(crate) fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn id(&self) -> TableId {
        self.table.id()
    }

    pub fn table(&self) -> &Table<Extent, Tile> {
        &self.table
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// Tile extents in row-major order.
    pub fn tiles(&self) -> &[Extent] {
        &self.tiles
    }

    /// The region covering the whole array.
    pub fn full_extent(&self) -> Extent {
        Extent::from_shape(&self.shape)
    }

    pub fn state(&self) -> TableState {
        self.table.state()
    }

    /// Tile extents owned by `shard`.
    pub fn tiles_for_shard(&self, shard: usize) -> impl Iterator<Item = &Extent> + '_ {
        self.tiles
            .iter()
            .filter(move |ex| self.table.shard_for(ex) == shard)
    }

    /// Contents of one tile extent. Unwritten cells read as zero.
    pub fn read_tile(&self, extent: &Extent) -> Result<TileData> {
        match self.table.get(extent)? {
            Some(tile) if tile.extent == *extent => Ok(tile.data),
            Some(tile) => tile.read(extent, self.dtype, self.sparse),
            None => Ok(TileData::zeros(extent.shape(), self.dtype, self.sparse)),
        }
    }

    /// Cells of `region`, assembled from every tile it touches.
    pub fn fetch(&self, region: &Extent) -> Result<TileData> {
        if region.array_shape() != self.shape.as_slice() {
            return Err(Error::shape_mismatch("array fetch", &self.shape, region.array_shape()));
        }
        let mut out = TileData::zeros(region.shape(), self.dtype, self.sparse);
        for ex in self.tiles.iter() {
            let Some(overlap) = ex.intersection(region) else {
                continue;
            };
            if overlap.is_empty() {
                continue;
            }
            let Some(tile) = self.table.get(ex)? else {
                continue;
            };
            let block = if tile.extent == overlap {
                tile.data
            } else {
                tile.read(&overlap, self.dtype, self.sparse)?
            };
            out.paste(&overlap.translate(region.ul(), &region.shape())?, &block)?;
        }
        Ok(out)
    }

    /// The whole array as one block.
    pub fn glom(&self) -> Result<TileData> {
        self.fetch(&self.full_extent())
    }

    /// Split `data` into per-tile pieces, cast to the array's dtype.
    fn pieces(&self, region: &Extent, data: &TileData) -> Result<Vec<(Extent, Tile)>> {
        if region.shape() != data.shape() {
            return Err(Error::shape_mismatch("array update", &region.shape(), data.shape()));
        }
        let cast;
        let data = if data.dtype() == Some(self.dtype) {
            data
        } else {
            cast = data.cast(self.dtype)?;
            &cast
        };
        let mut pieces = Vec::new();
        for ex in self.tiles.iter() {
            let Some(overlap) = ex.intersection(region) else {
                continue;
            };
            if overlap.is_empty() {
                continue;
            }
            let block = if overlap == *region {
                data.clone()
            } else {
                data.select(&overlap.translate(region.ul(), &region.shape())?)?
            };
            pieces.push((ex.clone(), Tile::new(overlap, block)?));
        }
        Ok(pieces)
    }

    /// Write `data` over `region`, split across the tiles it touches.
    pub fn update(&self, region: &Extent, data: &TileData) -> Result<()> {
        for (key, tile) in self.pieces(region, data)? {
            self.table.update(key, tile)?;
        }
        Ok(())
    }

    /// Non-blocking form of [`DistArray::update`]; completions join `group`.
    pub fn update_async(
        &self,
        region: &Extent,
        data: &TileData,
        group: &mut FutureGroup,
    ) -> Result<()> {
        for (key, tile) in self.pieces(region, data)? {
            group.append(self.table.update_async(key, tile)?);
        }
        Ok(())
    }

    /// Run `f` once per tile extent, on the shard owning the tile.
    pub fn foreach_tile<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Kernel<'_>, &Extent) -> anyhow::Result<()> + Sync,
    {
        let master = self.table.master()?;
        master.foreach_shard(
            self.id(),
            |kernel, _: &()| {
                for ex in self.tiles_for_shard(kernel.current_shard()) {
                    f(kernel, ex)?;
                }
                Ok(())
            },
            (),
        )
    }

    pub fn destroy(&self) -> Result<()> {
        self.table.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpartanConfig;
    use crate::tile::DenseTile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn master() -> Master {
        Master::start(SpartanConfig::for_tests(2, 3)).unwrap()
    }

    fn seq(shape: &[usize]) -> TileData {
        let n: usize = shape.iter().product();
        let data = (0..n).map(|v| v as f64).collect();
        TileData::Dense(DenseTile::new(shape.to_vec(), DType::F64, data).unwrap())
    }

    #[test]
    fn unwritten_array_reads_zero() {
        let master = master();
        let array = DistArray::ndarray(&master, &[5, 4], DType::I64, false).unwrap();
        assert_eq!(array.tiles().len(), 4);
        assert_eq!(array.state(), TableState::Created);
        let all = array.glom().unwrap().to_dense().unwrap();
        assert_eq!(all.shape(), &[5, 4]);
        assert!(all.data().iter().all(|v| *v == 0.0));
        assert_eq!(all.dtype(), DType::I64);
    }

    #[test]
    fn update_splits_across_tiles() {
        let master = master();
        let array = DistArray::ndarray(&master, &[5, 5], DType::F64, false).unwrap();
        let region = Extent::new(vec![1, 1], vec![5, 4], vec![5, 5]).unwrap();
        array.update(&region, &seq(&[4, 3])).unwrap();
        let all = array.glom().unwrap().to_dense().unwrap();
        assert_eq!(all.get(&[1, 1]), 0.0);
        assert_eq!(all.get(&[1, 2]), 1.0);
        assert_eq!(all.get(&[4, 3]), 11.0);
        assert_eq!(all.get(&[0, 0]), 0.0);
        assert_eq!(all.get(&[4, 4]), 0.0);

        let sub = array.fetch(&Extent::new(vec![3, 2], vec![5, 4], vec![5, 5]).unwrap()).unwrap();
        assert_eq!(sub.to_dense().unwrap().data(), &[7.0, 8.0, 10.0, 11.0]);
    }

    #[test]
    fn partial_tiles_grow_as_writes_arrive() {
        let master = master();
        let array = DistArray::ndarray(&master, &[3, 3], DType::F64, false).unwrap();
        let top = Extent::new(vec![0, 0], vec![1, 3], vec![3, 3]).unwrap();
        let bottom = Extent::new(vec![2, 0], vec![3, 3], vec![3, 3]).unwrap();
        array.update(&top, &seq(&[1, 3])).unwrap();
        array.update(&bottom, &seq(&[1, 3])).unwrap();
        let tile = array.read_tile(&array.tiles()[0]).unwrap().to_dense().unwrap();
        assert_eq!(tile.data(), &[0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn foreach_tile_visits_each_extent_once() {
        let master = master();
        let array = DistArray::ndarray(&master, &[7, 7], DType::F64, false).unwrap();
        let visits = AtomicUsize::new(0);
        array
            .foreach_tile(|_, _| {
                visits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(visits.load(Ordering::SeqCst), array.tiles().len());
        assert_eq!(array.tiles().len(), 9);
    }

    #[test]
    fn update_rejects_mismatched_block() {
        let master = master();
        let array = DistArray::ndarray(&master, &[4], DType::F64, false).unwrap();
        let region = Extent::new(vec![0], vec![2], vec![4]).unwrap();
        assert!(matches!(
            array.update(&region, &seq(&[3])),
            Err(Error::InvariantViolation { .. })
        ));
    }

    #[test]
    fn writes_take_the_array_dtype() {
        let master = master();
        let floats =
            |v: Vec<f64>| TileData::Dense(DenseTile::new(vec![4], DType::F64, v).unwrap());

        let ints = DistArray::ndarray(&master, &[4], DType::I64, false).unwrap();
        ints.update(&ints.full_extent(), &floats(vec![0.6, 0.6, 2.5, -1.5])).unwrap();
        let stored = ints.read_tile(&ints.tiles()[0]).unwrap();
        assert_eq!(stored.dtype(), Some(DType::I64));
        let sum = Expr::array(ints.clone()).sum(0).evaluate(&master).unwrap();
        assert_eq!(sum.dtype(), DType::I64);
        assert_eq!(sum.glom().unwrap().to_dense().unwrap().data(), &[1.0]);
        let cells: f64 = ints.glom().unwrap().to_dense().unwrap().data().iter().sum();
        assert_eq!(cells, 1.0);

        let flags = DistArray::ndarray(&master, &[4], DType::Bool, false).unwrap();
        flags.update(&flags.full_extent(), &floats(vec![5.0, 0.0, -2.0, 0.5])).unwrap();
        let sum = Expr::array(flags).sum(0).evaluate(&master).unwrap();
        assert_eq!(sum.dtype(), DType::I64);
        assert_eq!(sum.glom().unwrap().to_dense().unwrap().data(), &[3.0]);
    }
}
