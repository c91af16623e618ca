//! # Tile Module
//!
//! Concrete blocks of array data. A [`Tile`] pairs a block with the absolute
//! [`Extent`] it covers; [`TileData`] is the block itself, dense, sparse, or a
//! structured `(idx, min)` record block produced by argmin reductions.
//!
//! Values are held as `f64` and tagged with a [`DType`]; integer and boolean
//! blocks are kept exact by casting on every write.

use crate::error::{Error, Result};
use crate::extent::Extent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element type tag of a numeric block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    I64,
    F64,
}

impl DType {
    /// Normalize a value into this dtype's domain.
    #[inline]
    pub fn cast(self, value: f64) -> f64 {
        match self {
            DType::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            DType::I64 => value.trunc(),
            DType::F64 => value,
        }
    }

    /// Result dtype of arithmetic between two operands.
    pub fn promote(a: DType, b: DType) -> DType {
        match (a, b) {
            (DType::F64, _) | (_, DType::F64) => DType::F64,
            _ => DType::I64,
        }
    }

    /// Dtype of a sum over values of this dtype.
    pub fn sum_dtype(self) -> DType {
        match self {
            DType::Bool => DType::I64,
            other => other,
        }
    }
}

/// Row-major strides for a shape.
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Visit every multi-index of `shape` in row-major order.
pub(crate) fn for_each_index(shape: &[usize], mut f: impl FnMut(&[usize])) {
    let n = numel(shape);
    let mut idx = vec![0usize; shape.len()];
    for _ in 0..n {
        f(&idx);
        for d in (0..shape.len()).rev() {
            idx[d] += 1;
            if idx[d] < shape[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}

fn remove_axis(shape: &[usize], axis: usize) -> Vec<usize> {
    shape
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != axis)
        .map(|(_, d)| *d)
        .collect()
}

fn check_axis(shape: &[usize], axis: usize) -> Result<()> {
    if axis >= shape.len() {
        return Err(Error::InvariantViolation {
            context: "reduction axis",
            expected: format!("axis < {}", shape.len()),
            actual: format!("axis {axis}"),
        });
    }
    Ok(())
}

/// Dense n-dimensional block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DenseParts")]
pub struct DenseTile {
    shape: Vec<usize>,
    dtype: DType,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct DenseParts {
    shape: Vec<usize>,
    dtype: DType,
    data: Vec<f64>,
}

impl TryFrom<DenseParts> for DenseTile {
    type Error = Error;

    fn try_from(parts: DenseParts) -> Result<Self> {
        DenseTile::new(parts.shape, parts.dtype, parts.data)
    }
}

impl DenseTile {
    pub fn new(shape: Vec<usize>, dtype: DType, data: Vec<f64>) -> Result<Self> {
        if data.len() != numel(&shape) {
            return Err(Error::shape_mismatch(
                "dense tile",
                &shape,
                &[data.len()],
            ));
        }
        let data = data.into_iter().map(|v| dtype.cast(v)).collect();
        Ok(Self { shape, dtype, data })
    }

    pub fn zeros(shape: Vec<usize>, dtype: DType) -> Self {
        let n = numel(&shape);
        Self {
            shape,
            dtype,
            data: vec![0.0; n],
        }
    }

    pub fn from_fn(shape: Vec<usize>, dtype: DType, f: impl Fn(&[usize]) -> f64) -> Self {
        let mut data = Vec::with_capacity(numel(&shape));
        for_each_index(&shape, |idx| data.push(dtype.cast(f(idx))));
        Self { shape, dtype, data }
    }

    /// A 0-dimensional block holding one value.
    pub fn scalar(value: f64, dtype: DType) -> Self {
        Self {
            shape: Vec::new(),
            dtype,
            data: vec![dtype.cast(value)],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    fn flat(&self, idx: &[usize]) -> usize {
        idx.iter().zip(strides(&self.shape)).map(|(i, s)| i * s).sum()
    }

    pub fn get(&self, idx: &[usize]) -> f64 {
        self.data[self.flat(idx)]
    }

    pub fn set(&mut self, idx: &[usize], value: f64) {
        let at = self.flat(idx);
        self.data[at] = self.dtype.cast(value);
    }

    pub fn cast(&self, dtype: DType) -> DenseTile {
        DenseTile {
            shape: self.shape.clone(),
            dtype,
            data: self.data.iter().map(|v| dtype.cast(*v)).collect(),
        }
    }

    fn select(&self, region: &Extent) -> DenseTile {
        let ul = region.ul();
        DenseTile::from_fn(region.shape(), self.dtype, |idx| {
            let src: Vec<usize> = idx.iter().zip(ul).map(|(i, o)| i + o).collect();
            self.get(&src)
        })
    }

    /// Sum along `axis`, removing it.
    pub fn sum_axis(&self, axis: usize) -> Result<DenseTile> {
        check_axis(&self.shape, axis)?;
        let axis_len = self.shape[axis];
        let out_shape = remove_axis(&self.shape, axis);
        Ok(DenseTile::from_fn(out_shape, self.dtype.sum_dtype(), |idx| {
            let mut full: Vec<usize> = idx.to_vec();
            full.insert(axis, 0);
            let mut sum = 0.0;
            for k in 0..axis_len {
                full[axis] = k;
                sum += self.get(&full);
            }
            sum
        }))
    }

    /// Minimum values and their first positions along `axis`.
    pub fn argmin_axis(&self, axis: usize) -> Result<(Vec<i64>, DenseTile)> {
        check_axis(&self.shape, axis)?;
        let axis_len = self.shape[axis];
        if axis_len == 0 {
            return Err(Error::InvariantViolation {
                context: "argmin of empty axis",
                expected: "non-empty axis".to_string(),
                actual: format!("shape {:?}", self.shape),
            });
        }
        let out_shape = remove_axis(&self.shape, axis);
        let mut positions = Vec::with_capacity(numel(&out_shape));
        let mut minima = Vec::with_capacity(numel(&out_shape));
        for_each_index(&out_shape, |idx| {
            let mut full: Vec<usize> = idx.to_vec();
            full.insert(axis, 0);
            let mut best = (0usize, self.get(&full));
            for k in 1..axis_len {
                full[axis] = k;
                let v = self.get(&full);
                if v < best.1 {
                    best = (k, v);
                }
            }
            positions.push(best.0 as i64);
            minima.push(best.1);
        });
        Ok((
            positions,
            DenseTile {
                shape: out_shape,
                dtype: self.dtype,
                data: minima,
            },
        ))
    }
}

/// Sparse n-dimensional block in coordinate form. Absent cells are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SparseParts", into = "SparseParts")]
pub struct SparseTile {
    shape: Vec<usize>,
    dtype: DType,
    entries: BTreeMap<Vec<usize>, f64>,
}

#[derive(Serialize, Deserialize)]
struct SparseParts {
    shape: Vec<usize>,
    dtype: DType,
    coords: Vec<Vec<usize>>,
    values: Vec<f64>,
}

impl TryFrom<SparseParts> for SparseTile {
    type Error = Error;

    fn try_from(parts: SparseParts) -> Result<Self> {
        if parts.coords.len() != parts.values.len() {
            return Err(Error::shape_mismatch(
                "sparse entries",
                &[parts.coords.len()],
                &[parts.values.len()],
            ));
        }
        SparseTile::from_entries(
            parts.shape,
            parts.dtype,
            parts.coords.into_iter().zip(parts.values),
        )
    }
}

impl From<SparseTile> for SparseParts {
    fn from(tile: SparseTile) -> Self {
        let (coords, values) = tile.entries.into_iter().unzip();
        SparseParts {
            shape: tile.shape,
            dtype: tile.dtype,
            coords,
            values,
        }
    }
}

impl SparseTile {
    pub fn new(shape: Vec<usize>, dtype: DType) -> Self {
        Self {
            shape,
            dtype,
            entries: BTreeMap::new(),
        }
    }

    /// Build from `(coordinate, value)` triplets; later duplicates win.
    pub fn from_entries(
        shape: Vec<usize>,
        dtype: DType,
        entries: impl IntoIterator<Item = (Vec<usize>, f64)>,
    ) -> Result<Self> {
        let mut tile = Self::new(shape, dtype);
        for (coord, value) in entries {
            let in_bounds = coord.len() == tile.shape.len()
                && coord.iter().zip(&tile.shape).all(|(c, d)| c < d);
            if !in_bounds {
                return Err(Error::shape_mismatch("sparse entry", &tile.shape, &coord));
            }
            tile.set(coord, value);
        }
        Ok(tile)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, idx: &[usize]) -> f64 {
        self.entries.get(idx).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, idx: Vec<usize>, value: f64) {
        let value = self.dtype.cast(value);
        if value == 0.0 {
            self.entries.remove(&idx);
        } else {
            self.entries.insert(idx, value);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[usize], f64)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), *v))
    }

    pub fn to_dense(&self) -> DenseTile {
        let mut dense = DenseTile::zeros(self.shape.clone(), self.dtype);
        for (coord, value) in &self.entries {
            dense.set(coord, *value);
        }
        dense
    }

    fn select(&self, region: &Extent) -> SparseTile {
        let mut out = SparseTile::new(region.shape(), self.dtype);
        for (coord, value) in &self.entries {
            let inside = coord
                .iter()
                .zip(region.ul().iter().zip(region.lr()))
                .all(|(c, (u, l))| u <= c && c < l);
            if inside {
                let local = coord.iter().zip(region.ul()).map(|(c, u)| c - u).collect();
                out.entries.insert(local, *value);
            }
        }
        out
    }

    fn clear_region(&mut self, region: &Extent) {
        self.entries.retain(|coord, _| {
            !coord
                .iter()
                .zip(region.ul().iter().zip(region.lr()))
                .all(|(c, (u, l))| u <= c && c < l)
        });
    }
}

/// Argmin partial result: per position, the global index and value of the
/// smallest element seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StructuredParts")]
pub struct StructuredTile {
    shape: Vec<usize>,
    idx: Vec<i64>,
    min: Vec<f64>,
}

#[derive(Deserialize)]
struct StructuredParts {
    shape: Vec<usize>,
    idx: Vec<i64>,
    min: Vec<f64>,
}

impl TryFrom<StructuredParts> for StructuredTile {
    type Error = Error;

    fn try_from(parts: StructuredParts) -> Result<Self> {
        let min = DenseTile::new(parts.shape, DType::F64, parts.min)?;
        StructuredTile::pack(parts.idx, min)
    }
}

/// Named field of a [`StructuredTile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Idx,
    Min,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Idx => "idx",
            Field::Min => "min",
        }
    }
}

impl StructuredTile {
    /// Pack index and minimum fields that share one shape.
    pub fn pack(idx: Vec<i64>, min: DenseTile) -> Result<Self> {
        if idx.len() != min.data.len() {
            return Err(Error::shape_mismatch("structured fields", &min.shape, &[idx.len()]));
        }
        Ok(Self {
            shape: min.shape,
            idx,
            min: min.data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn field(&self, field: Field) -> DenseTile {
        match field {
            Field::Idx => DenseTile {
                shape: self.shape.clone(),
                dtype: DType::I64,
                data: self.idx.iter().map(|v| *v as f64).collect(),
            },
            Field::Min => DenseTile {
                shape: self.shape.clone(),
                dtype: DType::F64,
                data: self.min.clone(),
            },
        }
    }

    /// Per position, keep the record of `self` where its minimum is strictly
    /// smaller, else take the record of `other`.
    pub fn keep_smaller(&mut self, other: &StructuredTile) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::shape_mismatch("argmin combine", &self.shape, &other.shape));
        }
        for i in 0..self.min.len() {
            if !(self.min[i] < other.min[i]) {
                self.min[i] = other.min[i];
                self.idx[i] = other.idx[i];
            }
        }
        Ok(())
    }

    fn select(&self, region: &Extent) -> StructuredTile {
        let idx_field = self.field(Field::Idx).select(region);
        let min_field = self.field(Field::Min).select(region);
        StructuredTile {
            shape: min_field.shape,
            idx: idx_field.data.iter().map(|v| *v as i64).collect(),
            min: min_field.data,
        }
    }

    fn paste(&mut self, region: &Extent, src: &StructuredTile) {
        let st = strides(&self.shape);
        let ul = region.ul();
        let mut i = 0;
        for_each_index(&src.shape, |idx| {
            let at: usize = idx.iter().zip(ul).zip(&st).map(|((i, o), s)| (i + o) * s).sum();
            self.idx[at] = src.idx[i];
            self.min[at] = src.min[i];
            i += 1;
        });
    }
}

/// One block of array data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileData {
    Dense(DenseTile),
    Sparse(SparseTile),
    Structured(StructuredTile),
}

impl From<DenseTile> for TileData {
    fn from(tile: DenseTile) -> Self {
        TileData::Dense(tile)
    }
}

impl From<SparseTile> for TileData {
    fn from(tile: SparseTile) -> Self {
        TileData::Sparse(tile)
    }
}

impl From<StructuredTile> for TileData {
    fn from(tile: StructuredTile) -> Self {
        TileData::Structured(tile)
    }
}

impl TileData {
    /// A zero block of the given shape.
    pub fn zeros(shape: Vec<usize>, dtype: DType, sparse: bool) -> Self {
        if sparse {
            TileData::Sparse(SparseTile::new(shape, dtype))
        } else {
            TileData::Dense(DenseTile::zeros(shape, dtype))
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            TileData::Dense(t) => t.shape(),
            TileData::Sparse(t) => t.shape(),
            TileData::Structured(t) => t.shape(),
        }
    }

    /// Numeric dtype, `None` for structured blocks.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            TileData::Dense(t) => Some(t.dtype()),
            TileData::Sparse(t) => Some(t.dtype()),
            TileData::Structured(_) => None,
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, TileData::Sparse(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TileData::Dense(_) => "dense",
            TileData::Sparse(_) => "sparse",
            TileData::Structured(_) => "structured",
        }
    }

    /// Dense view of a numeric block.
    pub fn to_dense(&self) -> Result<DenseTile> {
        match self {
            TileData::Dense(t) => Ok(t.clone()),
            TileData::Sparse(t) => Ok(t.to_dense()),
            TileData::Structured(_) => Err(Error::TypeMismatch {
                expected: "dense or sparse block",
                found: self.kind().to_string(),
            }),
        }
    }

    /// Sub-block at `region`, given in this block's own coordinates.
    pub fn select(&self, region: &Extent) -> Result<TileData> {
        let bounds = Extent::from_shape(self.shape());
        if !bounds.contains(region) {
            return Err(Error::shape_mismatch("tile select", self.shape(), region.lr()));
        }
        Ok(match self {
            TileData::Dense(t) => TileData::Dense(t.select(region)),
            TileData::Sparse(t) => TileData::Sparse(t.select(region)),
            TileData::Structured(t) => TileData::Structured(t.select(region)),
        })
    }

    /// Overwrite the cells at `region` (own coordinates) with `src`.
    pub fn paste(&mut self, region: &Extent, src: &TileData) -> Result<()> {
        if region.shape() != src.shape() {
            return Err(Error::shape_mismatch("tile paste", &region.shape(), src.shape()));
        }
        let bounds = Extent::from_shape(self.shape());
        if !bounds.contains(region) {
            return Err(Error::shape_mismatch("tile paste", self.shape(), region.lr()));
        }
        match (&mut *self, src) {
            (TileData::Structured(dst), TileData::Structured(src)) => {
                dst.paste(region, src);
                Ok(())
            }
            (TileData::Structured(_), _) | (_, TileData::Structured(_)) => {
                Err(Error::TypeMismatch {
                    expected: "matching structured blocks",
                    found: src.kind().to_string(),
                })
            }
            (TileData::Sparse(dst), src) => {
                dst.clear_region(region);
                let ul = region.ul().to_vec();
                let shifted = |coord: &[usize]| -> Vec<usize> {
                    coord.iter().zip(&ul).map(|(c, o)| c + o).collect()
                };
                match src {
                    TileData::Sparse(s) => {
                        for (coord, value) in s.entries() {
                            dst.set(shifted(coord), value);
                        }
                    }
                    TileData::Dense(d) => {
                        for_each_index(d.shape(), |idx| {
                            let v = d.get(idx);
                            if v != 0.0 {
                                dst.set(shifted(idx), v);
                            }
                        });
                    }
                    TileData::Structured(_) => unreachable!("handled above"),
                }
                Ok(())
            }
            (TileData::Dense(dst), src) => {
                let src = src.to_dense()?;
                let ul = region.ul().to_vec();
                for_each_index(src.shape(), |idx| {
                    let at: Vec<usize> = idx.iter().zip(&ul).map(|(i, o)| i + o).collect();
                    dst.set(&at, src.get(idx));
                });
                Ok(())
            }
        }
    }

    /// This block with every value cast to `dtype`. Sparse blocks stay sparse;
    /// structured blocks have no dtype and are rejected.
    pub fn cast(&self, dtype: DType) -> Result<TileData> {
        match self {
            TileData::Dense(t) if t.dtype == dtype => Ok(self.clone()),
            TileData::Sparse(t) if t.dtype == dtype => Ok(self.clone()),
            TileData::Dense(t) => Ok(TileData::Dense(t.cast(dtype))),
            TileData::Sparse(t) => {
                let mut out = SparseTile::new(t.shape.clone(), dtype);
                for (coord, value) in &t.entries {
                    out.set(coord.clone(), *value);
                }
                Ok(TileData::Sparse(out))
            }
            TileData::Structured(_) => Err(Error::TypeMismatch {
                expected: "dense or sparse block",
                found: self.kind().to_string(),
            }),
        }
    }

    /// Elementwise transform of a numeric block.
    pub fn map(&self, dtype: DType, f: impl Fn(f64) -> f64) -> Result<TileData> {
        let a = self.to_dense()?;
        let data = a.data.iter().map(|x| f(*x)).collect();
        Ok(TileData::Dense(DenseTile::new(a.shape, dtype, data)?))
    }

    /// Elementwise combination of two numeric blocks. 0-d blocks broadcast.
    pub fn zip_with(
        &self,
        other: &TileData,
        dtype: DType,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<TileData> {
        let a = self.to_dense()?;
        let b = other.to_dense()?;
        let data: Vec<f64> = if a.is_scalar() {
            b.data.iter().map(|y| f(a.data[0], *y)).collect()
        } else if b.is_scalar() || a.shape == b.shape {
            let scalar = b.is_scalar();
            a.data
                .iter()
                .enumerate()
                .map(|(i, x)| f(*x, if scalar { b.data[0] } else { b.data[i] }))
                .collect()
        } else {
            return Err(Error::shape_mismatch("elementwise operands", &a.shape, &b.shape));
        };
        let shape = if a.is_scalar() { b.shape } else { a.shape };
        Ok(TileData::Dense(DenseTile::new(shape, dtype, data)?))
    }
}

/// A block together with the absolute region it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub extent: Extent,
    pub data: TileData,
}

impl Tile {
    pub fn new(extent: Extent, data: TileData) -> Result<Self> {
        if extent.shape() != data.shape() {
            return Err(Error::shape_mismatch("tile", &extent.shape(), data.shape()));
        }
        Ok(Self { extent, data })
    }

    /// Cells of `region` (absolute coordinates). Cells this tile never covered
    /// read as zero.
    pub fn read(&self, region: &Extent, dtype: DType, sparse: bool) -> Result<TileData> {
        let mut out = TileData::zeros(region.shape(), dtype, sparse);
        if let Some(overlap) = self.extent.intersection(region) {
            if overlap.is_empty() {
                return Ok(out);
            }
            let src = self
                .data
                .select(&overlap.translate(self.extent.ul(), &self.extent.shape())?)?;
            out.paste(&overlap.translate(region.ul(), &region.shape())?, &src)?;
        }
        Ok(out)
    }

    /// Replace-merge: paint `incoming` over this tile, growing to the bounding
    /// region of both when `incoming` reaches outside what is stored.
    pub fn paint(&mut self, incoming: Tile) -> Result<()> {
        if incoming.extent.contains(&self.extent) {
            *self = incoming;
            return Ok(());
        }
        if !self.extent.contains(&incoming.extent) {
            let bounds = self.extent.bounding(&incoming.extent);
            if let TileData::Structured(_) = self.data {
                return Err(Error::TypeMismatch {
                    expected: "numeric tile",
                    found: "structured".to_string(),
                });
            }
            let dtype = self.data.dtype().unwrap_or(DType::F64);
            let mut grown = TileData::zeros(bounds.shape(), dtype, self.data.is_sparse());
            let at = self.extent.translate(bounds.ul(), &bounds.shape())?;
            grown.paste(&at, &self.data)?;
            self.extent = bounds;
            self.data = grown;
        }
        let at = incoming.extent.translate(self.extent.ul(), &self.extent.shape())?;
        self.data.paste(&at, &incoming.data)
    }

    /// Sum-merge of a partial result for the same region.
    pub fn add_assign(&mut self, incoming: Tile) -> Result<()> {
        if self.extent != incoming.extent {
            return Err(Error::shape_mismatch(
                "sum combine",
                &self.extent.shape(),
                &incoming.extent.shape(),
            ));
        }
        let dtype = DType::promote(
            self.data.dtype().unwrap_or(DType::F64),
            incoming.data.dtype().unwrap_or(DType::F64),
        );
        self.data = self.data.zip_with(&incoming.data, dtype, |a, b| a + b)?;
        Ok(())
    }

    /// Argmin-merge of a partial result for the same region.
    pub fn min_assign(&mut self, incoming: Tile) -> Result<()> {
        match (&mut self.data, &incoming.data) {
            (TileData::Structured(current), TileData::Structured(other)) => {
                current.keep_smaller(other)
            }
            _ => Err(Error::TypeMismatch {
                expected: "structured argmin tiles",
                found: format!("{} and {}", self.data.kind(), incoming.data.kind()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(shape: &[usize]) -> DenseTile {
        let n: usize = shape.iter().product();
        DenseTile::new(shape.to_vec(), DType::F64, (0..n).map(|v| v as f64).collect()).unwrap()
    }

    #[test]
    fn sum_axis_matches_manual() {
        let t = seq(&[2, 3]);
        assert_eq!(t.sum_axis(0).unwrap().data(), &[3.0, 5.0, 7.0]);
        assert_eq!(t.sum_axis(1).unwrap().data(), &[3.0, 12.0]);
        assert!(t.sum_axis(2).is_err());
    }

    #[test]
    fn argmin_axis_returns_first_minimum() {
        let t = DenseTile::new(vec![2, 3], DType::F64, vec![4.0, 1.0, 1.0, 0.5, 9.0, 1.0]).unwrap();
        let (idx, min) = t.argmin_axis(1).unwrap();
        assert_eq!(idx, vec![1, 0]);
        assert_eq!(min.data(), &[1.0, 0.5]);
        let (idx, _) = t.argmin_axis(0).unwrap();
        assert_eq!(idx, vec![1, 0, 0]);
    }

    #[test]
    fn select_and_paste_round_trip_regions() {
        let src = TileData::Dense(seq(&[4, 4]));
        let region = Extent::new(vec![1, 1], vec![3, 3], vec![4, 4]).unwrap();
        let block = src.select(&region).unwrap();
        assert_eq!(block.to_dense().unwrap().data(), &[5.0, 6.0, 9.0, 10.0]);

        let mut dst = TileData::zeros(vec![4, 4], DType::F64, false);
        dst.paste(&region, &block).unwrap();
        let dense = dst.to_dense().unwrap();
        assert_eq!(dense.get(&[1, 2]), 6.0);
        assert_eq!(dense.get(&[0, 0]), 0.0);
    }

    #[test]
    fn sparse_paste_replaces_region() {
        let mut sparse = TileData::Sparse(
            SparseTile::from_entries(
                vec![3, 3],
                DType::F64,
                vec![(vec![0, 0], 1.0), (vec![1, 1], 2.0)],
            )
            .unwrap(),
        );
        let region = Extent::new(vec![1, 1], vec![2, 2], vec![3, 3]).unwrap();
        let zero = TileData::zeros(vec![1, 1], DType::F64, true);
        sparse.paste(&region, &zero).unwrap();
        match &sparse {
            TileData::Sparse(s) => assert_eq!(s.nnz(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dtype_cast_keeps_integers_exact() {
        let t = DenseTile::new(vec![3], DType::I64, vec![1.7, -2.2, 3.0]).unwrap();
        assert_eq!(t.data(), &[1.0, -2.0, 3.0]);
        let b = DenseTile::new(vec![2], DType::Bool, vec![0.0, 5.0]).unwrap();
        assert_eq!(b.data(), &[0.0, 1.0]);
        assert_eq!(b.sum_axis(0).unwrap().dtype(), DType::I64);
    }

    #[test]
    fn paint_grows_partial_tiles() {
        let shape = vec![4, 4];
        let left = Tile::new(
            Extent::new(vec![0, 0], vec![2, 2], shape.clone()).unwrap(),
            TileData::Dense(DenseTile::new(vec![2, 2], DType::F64, vec![1.0; 4]).unwrap()),
        )
        .unwrap();
        let right = Tile::new(
            Extent::new(vec![2, 2], vec![4, 4], shape.clone()).unwrap(),
            TileData::Dense(DenseTile::new(vec![2, 2], DType::F64, vec![2.0; 4]).unwrap()),
        )
        .unwrap();
        let mut merged = left;
        merged.paint(right).unwrap();
        assert_eq!(merged.extent, Extent::from_shape(&shape));
        let dense = merged.data.to_dense().unwrap();
        assert_eq!(dense.get(&[0, 0]), 1.0);
        assert_eq!(dense.get(&[3, 3]), 2.0);
        assert_eq!(dense.get(&[0, 3]), 0.0);
    }

    #[test]
    fn keep_smaller_prefers_strictly_smaller() {
        let mins = |v: Vec<f64>| DenseTile::new(vec![2], DType::F64, v).unwrap();
        let a = StructuredTile::pack(vec![0, 5], mins(vec![1.0, 3.0])).unwrap();
        let b = StructuredTile::pack(vec![7, 8], mins(vec![2.0, 3.0])).unwrap();
        let mut merged = a;
        merged.keep_smaller(&b).unwrap();
        assert_eq!(merged.field(Field::Idx).data(), &[0.0, 8.0]);
        assert_eq!(merged.field(Field::Min).data(), &[1.0, 3.0]);
    }

    #[test]
    fn zip_with_broadcasts_scalars() {
        let a = TileData::Dense(seq(&[2, 2]));
        let two = TileData::Dense(DenseTile::scalar(2.0, DType::F64));
        let out = a.zip_with(&two, DType::F64, |x, y| x * y).unwrap();
        assert_eq!(out.to_dense().unwrap().data(), &[0.0, 2.0, 4.0, 6.0]);
        let bad = TileData::Dense(seq(&[3]));
        assert!(a.zip_with(&bad, DType::F64, |x, y| x + y).is_err());
    }

    #[test]
    fn sparse_serializes_as_coordinates() {
        let sparse = TileData::Sparse(
            SparseTile::from_entries(vec![2, 2], DType::F64, vec![(vec![1, 0], 4.0)]).unwrap(),
        );
        let json = serde_json::to_string(&sparse).unwrap();
        let back: TileData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sparse);
    }

    #[test]
    fn cast_converts_dense_and_sparse_blocks() {
        let dense =
            TileData::Dense(DenseTile::new(vec![3], DType::F64, vec![0.6, 5.0, -1.5]).unwrap());
        let ints = dense.cast(DType::I64).unwrap().to_dense().unwrap();
        assert_eq!(ints.data(), &[0.0, 5.0, -1.0]);
        assert_eq!(ints.dtype(), DType::I64);
        let flags = dense.cast(DType::Bool).unwrap().to_dense().unwrap();
        assert_eq!(flags.data(), &[1.0, 1.0, 1.0]);

        let sparse = TileData::Sparse(
            SparseTile::from_entries(vec![4], DType::F64, vec![(vec![0], 0.4), (vec![2], 2.5)])
                .unwrap(),
        );
        match sparse.cast(DType::I64).unwrap() {
            TileData::Sparse(t) => {
                assert_eq!(t.nnz(), 1);
                assert_eq!(t.get(&[2]), 2.0);
            }
            other => panic!("expected sparse block, got {other:?}"),
        }
    }

    #[test]
    fn malformed_blocks_fail_to_deserialize() {
        let short = r#"{"kind":"dense","shape":[2,2],"dtype":"f64","data":[1.0]}"#;
        assert!(serde_json::from_str::<TileData>(short).is_err());

        let outside =
            r#"{"kind":"sparse","shape":[2],"dtype":"f64","coords":[[3]],"values":[1.0]}"#;
        assert!(serde_json::from_str::<TileData>(outside).is_err());

        let wrong_rank =
            r#"{"kind":"sparse","shape":[2,2],"dtype":"f64","coords":[[1]],"values":[1.0]}"#;
        assert!(serde_json::from_str::<TileData>(wrong_rank).is_err());

        let unpaired = r#"{"kind":"sparse","shape":[2],"dtype":"f64","coords":[[1]],"values":[]}"#;
        assert!(serde_json::from_str::<TileData>(unpaired).is_err());

        let fields = r#"{"kind":"structured","shape":[2],"idx":[0],"min":[1.0,2.0]}"#;
        assert!(serde_json::from_str::<TileData>(fields).is_err());

        let good = r#"{"kind":"dense","shape":[2],"dtype":"i64","data":[1.0,2.0]}"#;
        assert!(serde_json::from_str::<TileData>(good).is_ok());
    }
}
