//! Slice writes: `array[src_slices] = data[dst_slices]`.
//!
//! Writes mutate the destination array in place and hand it back. A concrete
//! block is applied directly; a distributed source is copied tile by tile,
//! each destination tile pulling the overlapping part of the source and
//! issuing non-blocking updates that are awaited before its kernel returns.

use super::DistArray;
use crate::error::{Error, Result};
use crate::extent::{from_slice, full_slices, intersection, Extent};
use crate::table::{FutureGroup, Master};
use crate::tile::TileData;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, instrument};

/// Right-hand side of a slice write.
#[derive(Debug, Clone)]
pub enum WriteData {
    Tile(TileData),
    Array(DistArray),
}

impl From<TileData> for WriteData {
    fn from(data: TileData) -> Self {
        WriteData::Tile(data)
    }
}

impl From<DistArray> for WriteData {
    fn from(array: DistArray) -> Self {
        WriteData::Array(array)
    }
}

/// On-disk encodings accepted by [`from_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// A serialized [`TileData`] block.
    Json,
    Numpy,
}

/// Copy `data[dst_slices]` into `array[src_slices]`.
#[instrument(skip_all, fields(array = %array.id()), level = "debug")]
pub fn write(
    array: &DistArray,
    src_slices: &[Range<usize>],
    data: impl Into<WriteData>,
    dst_slices: &[Range<usize>],
) -> Result<DistArray> {
    let sregion = from_slice(src_slices, array.shape())?;
    match data.into() {
        WriteData::Tile(TileData::Structured(_)) => {
            return Err(Error::TypeMismatch {
                expected: "dense block, sparse block or distributed array",
                found: "structured block".to_string(),
            })
        }
        WriteData::Tile(block) => {
            if sregion.shape() == block.shape() {
                array.update(&sregion, &block)?;
            } else {
                let dregion = from_slice(dst_slices, block.shape())?;
                array.update(&sregion, &block.select(&dregion)?)?;
            }
        }
        WriteData::Array(source) => {
            let dregion = from_slice(dst_slices, source.shape())?;
            if sregion.shape() != dregion.shape() {
                return Err(Error::shape_mismatch(
                    "distributed write",
                    &sregion.shape(),
                    &dregion.shape(),
                ));
            }
            let master = array.table().master()?;
            master.foreach_shard(
                array.id(),
                |kernel, _: &()| {
                    let mut group = FutureGroup::new();
                    for ex in array.tiles_for_shard(kernel.current_shard()) {
                        let Some(overlap) = intersection(ex, &sregion) else {
                            continue;
                        };
                        if overlap.is_empty() {
                            continue;
                        }
                        let relative = overlap.translate(sregion.ul(), &sregion.shape())?;
                        let src = relative.offset(dregion.ul(), source.shape())?;
                        let block = source.fetch(&src)?;
                        array.update_async(&overlap, &block, &mut group)?;
                    }
                    debug!(
                        shard = kernel.current_shard(),
                        updates = group.len(),
                        "awaiting writes"
                    );
                    group.wait()?;
                    Ok(())
                },
                (),
            )?;
        }
    }
    debug!(region = %sregion, "wrote slice");
    Ok(array.clone())
}

/// A new array holding a copy of `block`.
pub fn from_numpy(master: &Master, block: TileData) -> Result<DistArray> {
    let Some(dtype) = block.dtype() else {
        return Err(Error::TypeMismatch {
            expected: "dense or sparse block",
            found: block.kind().to_string(),
        });
    };
    let array = DistArray::ndarray(master, block.shape(), dtype, block.is_sparse())?;
    let slices = full_slices(block.shape());
    write(&array, &slices, block, &slices)
}

/// A new array loaded from `path`.
pub fn from_file(
    master: &Master,
    path: impl AsRef<Path>,
    file_type: FileType,
) -> Result<DistArray> {
    match file_type {
        FileType::Json => {
            let text = std::fs::read_to_string(path.as_ref())?;
            let block: TileData = serde_json::from_str(&text)?;
            from_numpy(master, block)
        }
        other => Err(Error::Unsupported {
            op: format!("from_file({other:?})"),
        }),
    }
}

/// Region of `array` a slice list selects.
pub fn slice_extent(array: &DistArray, slices: &[Range<usize>]) -> Result<Extent> {
    from_slice(slices, array.shape())
}
