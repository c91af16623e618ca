//! # Extent Module
//!
//! N-dimensional boxes over an array. An extent is the half-open region
//! `[ul, lr)` of an array whose full shape is `array_shape`; it is the key
//! under which tiles are stored and the unit every region computation works in.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Immutable region of an array.
///
/// Invariant: for every axis `ul[i] <= lr[i] <= array_shape[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Extent {
    ul: Vec<usize>,
    lr: Vec<usize>,
    array_shape: Vec<usize>,
}

impl Extent {
    /// Create an extent, validating rank and bounds.
    pub fn new(ul: Vec<usize>, lr: Vec<usize>, array_shape: Vec<usize>) -> Result<Self> {
        if ul.len() != lr.len() || lr.len() != array_shape.len() {
            return Err(Error::InvariantViolation {
                context: "extent rank",
                expected: format!("rank {}", array_shape.len()),
                actual: format!("ul {:?} lr {:?}", ul, lr),
            });
        }
        let in_bounds = ul
            .iter()
            .zip(&lr)
            .zip(&array_shape)
            .all(|((u, l), s)| u <= l && l <= s);
        if !in_bounds {
            return Err(Error::InvariantViolation {
                context: "extent bounds",
                expected: format!("ul <= lr <= {:?}", array_shape),
                actual: format!("ul {:?} lr {:?}", ul, lr),
            });
        }
        Ok(Self {
            ul,
            lr,
            array_shape,
        })
    }

    /// The extent covering an entire array.
    pub fn from_shape(shape: &[usize]) -> Self {
        Self {
            ul: vec![0; shape.len()],
            lr: shape.to_vec(),
            array_shape: shape.to_vec(),
        }
    }

    pub fn ul(&self) -> &[usize] {
        &self.ul
    }

    pub fn lr(&self) -> &[usize] {
        &self.lr
    }

    pub fn array_shape(&self) -> &[usize] {
        &self.array_shape
    }

    pub fn ndim(&self) -> usize {
        self.ul.len()
    }

    /// Shape of the region itself (`lr - ul` per axis).
    pub fn shape(&self) -> Vec<usize> {
        self.ul.iter().zip(&self.lr).map(|(u, l)| l - u).collect()
    }

    /// Number of cells in the region.
    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.ul.iter().zip(&self.lr).any(|(u, l)| u == l)
    }

    /// Whether `other` lies entirely inside this extent.
    pub fn contains(&self, other: &Extent) -> bool {
        self.ndim() == other.ndim()
            && self
                .ul
                .iter()
                .zip(&other.ul)
                .zip(self.lr.iter().zip(&other.lr))
                .all(|((su, ou), (sl, ol))| su <= ou && ol <= sl)
    }

    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        intersection(self, other)
    }

    /// Shift this region into a frame rooted at `origin`, whose full shape is
    /// `frame_shape`. Used to move an absolute intersection into the
    /// coordinates of a differently-rooted source region.
    pub fn translate(&self, origin: &[usize], frame_shape: &[usize]) -> Result<Extent> {
        let shifted = |coords: &[usize]| -> Result<Vec<usize>> {
            coords
                .iter()
                .zip(origin)
                .map(|(c, o)| {
                    c.checked_sub(*o).ok_or_else(|| Error::InvariantViolation {
                        context: "extent translate",
                        expected: format!("coordinates >= origin {:?}", origin),
                        actual: format!("{:?}", coords),
                    })
                })
                .collect()
        };
        Extent::new(shifted(&self.ul)?, shifted(&self.lr)?, frame_shape.to_vec())
    }

    /// Inverse of [`Extent::translate`]: move a region expressed relative to
    /// `origin` back into a frame of shape `frame_shape`.
    pub fn offset(&self, origin: &[usize], frame_shape: &[usize]) -> Result<Extent> {
        let ul = self.ul.iter().zip(origin).map(|(c, o)| c + o).collect();
        let lr = self.lr.iter().zip(origin).map(|(c, o)| c + o).collect();
        Extent::new(ul, lr, frame_shape.to_vec())
    }

    /// Smallest extent containing both regions.
    pub fn bounding(&self, other: &Extent) -> Extent {
        Extent {
            ul: self.ul.iter().zip(&other.ul).map(|(a, b)| *a.min(b)).collect(),
            lr: self.lr.iter().zip(&other.lr).map(|(a, b)| *a.max(b)).collect(),
            array_shape: self.array_shape.clone(),
        }
    }

    /// Key of the output tile produced by reducing this region along `axis`:
    /// the axis is removed from the region and from the array shape.
    pub fn index_for_reduction(&self, axis: usize) -> Extent {
        let drop_axis = |v: &[usize]| -> Vec<usize> {
            v.iter()
                .enumerate()
                .filter(|(i, _)| *i != axis)
                .map(|(_, c)| *c)
                .collect()
        };
        Extent {
            ul: drop_axis(&self.ul),
            lr: drop_axis(&self.lr),
            array_shape: drop_axis(&self.array_shape),
        }
    }

    /// Convert positions local to this region along `axis` into positions of
    /// the enclosing array.
    pub fn to_global(&self, local: &[i64], axis: usize) -> Vec<i64> {
        let base = self.ul[axis] as i64;
        local.iter().map(|idx| idx + base).collect()
    }

    /// Per-axis ranges of this region, suitable for slicing.
    pub fn to_slices(&self) -> Vec<Range<usize>> {
        self.ul.iter().zip(&self.lr).map(|(u, l)| *u..*l).collect()
    }

    /// Split an array of `shape` into tiles of at most `tile_dim` cells per axis.
    pub fn split(shape: &[usize], tile_dim: usize) -> Vec<Extent> {
        let tile_dim = tile_dim.max(1);
        let axis_ranges: Vec<Vec<(usize, usize)>> = shape
            .iter()
            .map(|&dim| {
                if dim == 0 {
                    return vec![(0, 0)];
                }
                (0..dim)
                    .step_by(tile_dim)
                    .map(|start| (start, (start + tile_dim).min(dim)))
                    .collect()
            })
            .collect();

        let mut extents = vec![Extent {
            ul: Vec::new(),
            lr: Vec::new(),
            array_shape: shape.to_vec(),
        }];
        for ranges in axis_ranges {
            let mut next = Vec::with_capacity(extents.len() * ranges.len());
            for ex in &extents {
                for &(start, end) in &ranges {
                    let mut grown = ex.clone();
                    grown.ul.push(start);
                    grown.lr.push(end);
                    next.push(grown);
                }
            }
            extents = next;
        }
        extents
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "extent(")?;
        for (axis, (u, l)) in self.ul.iter().zip(&self.lr).enumerate() {
            if axis > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{u}:{l}")?;
        }
        write!(f, " of {:?})", self.array_shape)
    }
}

/// Overlap of two regions, `None` when they are disjoint on any axis.
pub fn intersection(a: &Extent, b: &Extent) -> Option<Extent> {
    if a.ndim() != b.ndim() {
        return None;
    }
    let ul: Vec<usize> = a.ul.iter().zip(&b.ul).map(|(x, y)| *x.max(y)).collect();
    let lr: Vec<usize> = a.lr.iter().zip(&b.lr).map(|(x, y)| *x.min(y)).collect();
    if ul.iter().zip(&lr).any(|(u, l)| l < u) {
        return None;
    }
    Some(Extent {
        ul,
        lr,
        array_shape: a.array_shape.clone(),
    })
}

/// Whether an index extent and a value of `value_shape` describe the same block.
pub fn shapes_match(index: &Extent, value_shape: &[usize]) -> bool {
    index.shape() == value_shape
}

/// Resolve per-axis slices against an array shape. Missing trailing axes
/// select the full axis; ends past the array are clamped.
pub fn from_slice(slices: &[Range<usize>], array_shape: &[usize]) -> Result<Extent> {
    if slices.len() > array_shape.len() {
        return Err(Error::InvariantViolation {
            context: "slice rank",
            expected: format!("at most {} axes", array_shape.len()),
            actual: format!("{} axes", slices.len()),
        });
    }
    let mut ul = Vec::with_capacity(array_shape.len());
    let mut lr = Vec::with_capacity(array_shape.len());
    for (axis, &dim) in array_shape.iter().enumerate() {
        match slices.get(axis) {
            Some(range) => {
                let end = range.end.min(dim);
                let start = range.start.min(end);
                ul.push(start);
                lr.push(end);
            }
            None => {
                ul.push(0);
                lr.push(dim);
            }
        }
    }
    Extent::new(ul, lr, array_shape.to_vec())
}

/// Slices selecting every cell of an array of `shape`.
pub fn full_slices(shape: &[usize]) -> Vec<Range<usize>> {
    shape.iter().map(|&dim| 0..dim).collect()
}
