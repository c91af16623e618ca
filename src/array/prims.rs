//! Primitive operations produced by the expression compiler.
//!
//! A compiled tree has three node kinds: a concrete [`Constant`], an
//! elementwise [`PrimitiveOp::Map`] over co-tiled children, and a
//! [`PrimitiveOp::Reduce`] along one axis. Reductions carry a [`ReduceKind`]
//! that supplies the dtype rule, the per-tile local reducer and the combiner
//! applied when two partial results land on the same output key.

use super::DistArray;
use crate::error::{Error, Result};
use crate::extent::{shapes_match, Extent};
use crate::tile::{DType, Field, StructuredTile, Tile, TileData};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Elementwise binary operators understood by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Power,
    Equal,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 11] = [
        BinaryOp::Add,
        BinaryOp::Subtract,
        BinaryOp::Multiply,
        BinaryOp::Divide,
        BinaryOp::Mod,
        BinaryOp::Power,
        BinaryOp::Equal,
        BinaryOp::Less,
        BinaryOp::LessEqual,
        BinaryOp::Greater,
        BinaryOp::GreaterEqual,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Divide => "divide",
            BinaryOp::Mod => "mod",
            BinaryOp::Power => "power",
            BinaryOp::Equal => "equal",
            BinaryOp::Less => "less",
            BinaryOp::LessEqual => "less_equal",
            BinaryOp::Greater => "greater",
            BinaryOp::GreaterEqual => "greater_equal",
        }
    }

    pub fn from_name(name: &str) -> Option<BinaryOp> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        let flag = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            // Result takes the sign of the divisor.
            BinaryOp::Mod => {
                if b == 0.0 {
                    0.0
                } else {
                    a - b * (a / b).floor()
                }
            }
            BinaryOp::Power => a.powf(b),
            BinaryOp::Equal => flag(a == b),
            BinaryOp::Less => flag(a < b),
            BinaryOp::LessEqual => flag(a <= b),
            BinaryOp::Greater => flag(a > b),
            BinaryOp::GreaterEqual => flag(a >= b),
        }
    }

    pub fn result_dtype(self, a: DType, b: DType) -> DType {
        match self {
            BinaryOp::Equal
            | BinaryOp::Less
            | BinaryOp::LessEqual
            | BinaryOp::Greater
            | BinaryOp::GreaterEqual => DType::Bool,
            BinaryOp::Divide => DType::F64,
            _ => DType::promote(a, b),
        }
    }

    /// Apply to two numeric blocks, broadcasting 0-d operands.
    pub fn eval(self, a: &TileData, b: &TileData) -> Result<TileData> {
        let dtype = self.result_dtype(
            a.dtype().unwrap_or(DType::F64),
            b.dtype().unwrap_or(DType::F64),
        );
        a.zip_with(b, dtype, |x, y| self.apply(x, y))
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Array(DistArray),
    Scalar(f64),
}

/// Elementwise function applied by a `Map` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Binary(BinaryOp),
    /// Pull one named field out of structured tiles.
    ExtractField(Field),
}

/// Reduction rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Argmin,
}

impl ReduceKind {
    pub fn name(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Argmin => "argmin",
        }
    }

    /// Dtype of the reduction output given the input dtype. Argmin outputs
    /// are structured; `None` marks them.
    pub fn dtype(self, input: DType) -> Option<DType> {
        match self {
            ReduceKind::Sum => Some(input.sum_dtype()),
            ReduceKind::Argmin => None,
        }
    }

    /// Reduce one tile covering `extent` along `axis`. Returns the output key
    /// and the partial result stored under it.
    pub fn local_reduce(
        self,
        extent: &Extent,
        data: &TileData,
        axis: usize,
    ) -> Result<(Extent, TileData)> {
        let key = extent.index_for_reduction(axis);
        let dense = data.to_dense()?;
        let value = match self {
            ReduceKind::Sum => TileData::Dense(dense.sum_axis(axis)?),
            ReduceKind::Argmin => {
                let (local_idx, local_min) = dense.argmin_axis(axis)?;
                let global_idx = extent.to_global(&local_idx, axis);
                TileData::Structured(StructuredTile::pack(global_idx, local_min)?)
            }
        };
        if !shapes_match(&key, value.shape()) {
            return Err(Error::shape_mismatch(self.name(), &key.shape(), value.shape()));
        }
        Ok((key, value))
    }

    /// Merge `incoming` into `current`; both are partial results for one key.
    pub fn combine(self, current: &mut Tile, incoming: Tile) -> Result<()> {
        match self {
            ReduceKind::Sum => current.add_assign(incoming),
            ReduceKind::Argmin => current.min_assign(incoming),
        }
    }
}

/// Compiled operation tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveOp {
    Value(Constant),
    Map {
        children: Vec<PrimitiveOp>,
        kind: MapKind,
    },
    Reduce {
        child: Box<PrimitiveOp>,
        axis: usize,
        kind: ReduceKind,
    },
}

impl PrimitiveOp {
    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            PrimitiveOp::Value(_) => 1,
            PrimitiveOp::Map { children, .. } => {
                1 + children.iter().map(|c| c.node_count()).sum::<usize>()
            }
            PrimitiveOp::Reduce { child, .. } => 1 + child.node_count(),
        }
    }
}
