//! Execution of primitive op trees against the table runtime.
//!
//! `Map` nodes run tile by tile: every output tile extent is handled on the
//! shard owning it, the matching tiles of each operand are bound as inputs of
//! a local expression, and the result is written back. `Reduce` nodes run a
//! local reducer over every input tile and merge the partials into an output
//! table whose accumulator is the reduction's combiner.
//!
//! Arrays allocated along the way are destroyed on every exit path unless
//! they are handed back to the caller.

use super::prims::{Constant, MapKind, PrimitiveOp, ReduceKind};
use super::DistArray;
use crate::error::{Error, Result};
use crate::extent::Extent;
use crate::local::{Kwargs, LocalCtx, LocalExpr, LocalFn};
use crate::table::{mod_sharder, Accumulator, Master};
use crate::tile::{DType, DenseTile, Field, Tile, TileData};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// An array owned by the executor. Destroyed on drop unless kept.
struct Scratch {
    array: DistArray,
    armed: bool,
}

impl Scratch {
    fn new(array: DistArray) -> Self {
        Self { array, armed: true }
    }

    fn keep(mut self) -> DistArray {
        self.armed = false;
        self.array.clone()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.array.destroy() {
                warn!(array = %self.array.id(), error = %err, "failed to destroy scratch array");
            }
        }
    }
}

enum Operand {
    Array(DistArray),
    Temporary(Scratch),
    Scalar(f64),
}

impl Operand {
    fn array(&self) -> Option<&DistArray> {
        match self {
            Operand::Array(array) => Some(array),
            Operand::Temporary(scratch) => Some(&scratch.array),
            Operand::Scalar(_) => None,
        }
    }

    fn dtype(&self) -> DType {
        self.array().map_or(DType::F64, DistArray::dtype)
    }

    fn read_tile(&self, extent: &Extent) -> Result<TileData> {
        match self {
            Operand::Array(array) => array.read_tile(extent),
            Operand::Temporary(scratch) => scratch.array.read_tile(extent),
            Operand::Scalar(v) => Ok(TileData::Dense(DenseTile::scalar(*v, DType::F64))),
        }
    }
}

fn operand(master: &Master, op: &PrimitiveOp) -> Result<Operand> {
    Ok(match op {
        PrimitiveOp::Value(Constant::Scalar(v)) => Operand::Scalar(*v),
        PrimitiveOp::Value(Constant::Array(array)) => Operand::Array(array.clone()),
        other => Operand::Temporary(Scratch::new(execute(master, other)?)),
    })
}

/// Run a compiled tree and return its result array.
#[instrument(skip_all, level = "debug")]
pub fn execute(master: &Master, op: &PrimitiveOp) -> Result<DistArray> {
    match op {
        PrimitiveOp::Value(Constant::Array(array)) => Ok(array.clone()),
        PrimitiveOp::Value(Constant::Scalar(v)) => {
            let out = Scratch::new(DistArray::ndarray(master, &[], DType::F64, false)?);
            let value = TileData::Dense(DenseTile::scalar(*v, DType::F64));
            out.array.update(&out.array.full_extent(), &value)?;
            Ok(out.keep())
        }
        PrimitiveOp::Map { children, kind } => {
            // Dropping `operands` releases every temporary, on error too.
            let operands = children
                .iter()
                .map(|c| operand(master, c))
                .collect::<Result<Vec<_>>>()?;
            let (func, name, dtype) = map_fn(*kind, &operands)?;
            let names: Vec<String> = (0..operands.len()).map(|i| format!("arg{i}")).collect();
            let deps = names.iter().map(LocalExpr::input).collect();
            let expr = LocalExpr::fn_call(name, func, Kwargs::new(), deps);
            let bound: Vec<(String, &Operand)> = names.into_iter().zip(operands.iter()).collect();
            map_operands(master, &bound, &expr, Some(dtype))
        }
        PrimitiveOp::Reduce { child, axis, kind } => {
            let input = operand(master, child)?;
            match input.array() {
                Some(array) => reduce(master, array, *axis, *kind),
                None => Err(Error::InvariantViolation {
                    context: "reduction input",
                    expected: format!("an array with axis {axis}"),
                    actual: "a scalar".to_string(),
                }),
            }
        }
    }
}

fn map_fn(kind: MapKind, operands: &[Operand]) -> Result<(LocalFn, String, DType)> {
    match kind {
        MapKind::Binary(op) => {
            if operands.len() != 2 {
                return Err(Error::InvariantViolation {
                    context: "binary map",
                    expected: "2 operands".to_string(),
                    actual: format!("{} operands", operands.len()),
                });
            }
            let dtype = op.result_dtype(operands[0].dtype(), operands[1].dtype());
            let func: LocalFn =
                Arc::new(move |args: &[TileData], _: &Kwargs| op.eval(&args[0], &args[1]));
            Ok((func, op.name().to_string(), dtype))
        }
        MapKind::ExtractField(field) => {
            let func: LocalFn = Arc::new(move |args: &[TileData], _: &Kwargs| match &args[0] {
                TileData::Structured(s) => Ok(TileData::Dense(s.field(field))),
                other => Err(Error::TypeMismatch {
                    expected: "structured tile",
                    found: other.kind().to_string(),
                }),
            });
            let dtype = match field {
                Field::Idx => DType::I64,
                Field::Min => DType::F64,
            };
            Ok((func, format!("extract_{}", field.name()), dtype))
        }
    }
}

fn reduce(master: &Master, input: &DistArray, axis: usize, kind: ReduceKind) -> Result<DistArray> {
    if axis >= input.ndim() {
        return Err(Error::InvariantViolation {
            context: "reduction axis",
            expected: format!("axis < {}", input.ndim()),
            actual: format!("axis {axis}"),
        });
    }
    let out_shape: Vec<usize> = input
        .shape()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != axis)
        .map(|(_, d)| *d)
        .collect();
    let combine: Accumulator<Tile> =
        Arc::new(move |current: &mut Tile, incoming: Tile| Ok(kind.combine(current, incoming)?));
    let table = master.create_table(mod_sharder(), combine, None)?;
    let dtype = kind.dtype(input.dtype()).unwrap_or(DType::F64);
    let tile_dim = master.config().array.tile_dim;
    let out = Scratch::new(DistArray::from_table(table, &out_shape, dtype, false, tile_dim));

    input.foreach_tile(|_, ex| {
        let data = input.read_tile(ex)?;
        let (key, value) = kind.local_reduce(ex, &data, axis)?;
        out.array.table().update(key.clone(), Tile::new(key, value)?)?;
        Ok(())
    })?;
    let out = out.keep();
    debug!(op = kind.name(), axis, input = %input.id(), output = %out.id(), "reduced array");
    Ok(out)
}

/// Evaluate `expr` over co-tiled arrays, binding each array's tile under its
/// name. The result array takes the dtype of the produced tiles.
pub fn map_local(
    master: &Master,
    inputs: &[(&str, &DistArray)],
    expr: &Arc<LocalExpr>,
) -> Result<DistArray> {
    let operands: Vec<(String, Operand)> = inputs
        .iter()
        .map(|(name, array)| (name.to_string(), Operand::Array((*array).clone())))
        .collect();
    let bound: Vec<(String, &Operand)> = operands.iter().map(|(n, o)| (n.clone(), o)).collect();
    map_operands(master, &bound, expr, None)
}

fn map_operands(
    master: &Master,
    operands: &[(String, &Operand)],
    expr: &Arc<LocalExpr>,
    dtype: Option<DType>,
) -> Result<DistArray> {
    let mut shape: Option<&[usize]> = None;
    for array in operands.iter().filter_map(|(_, operand)| operand.array()) {
        match shape {
            None => shape = Some(array.shape()),
            Some(s) if s != array.shape() => {
                return Err(Error::shape_mismatch("map operands", s, array.shape()));
            }
            Some(_) => {}
        }
    }
    let shape = shape.unwrap_or(&[]).to_vec();
    let out = Scratch::new(DistArray::ndarray(
        master,
        &shape,
        dtype.unwrap_or(DType::F64),
        false,
    )?);
    let produced: Mutex<Option<DType>> = Mutex::new(None);
    let config = &master.config().local;

    out.array.foreach_tile(|_, ex: &Extent| {
        let mut ctx = LocalCtx::new(master.codegen(), config);
        for (name, operand) in operands {
            ctx.inputs.insert(name.clone(), operand.read_tile(ex)?);
        }
        let mut result = expr.evaluate(&ctx)?;
        if result.shape() != ex.shape().as_slice() {
            if !result.shape().is_empty() {
                let err = Error::shape_mismatch("local map result", &ex.shape(), result.shape());
                return Err(err.into());
            }
            // A 0-d result fills the whole tile.
            let dtype = result.dtype().unwrap_or(DType::F64);
            let zeros = TileData::zeros(ex.shape(), dtype, false);
            result = zeros.zip_with(&result, dtype, |_, v| v)?;
        }
        let result = match dtype {
            Some(dtype) => result.cast(dtype)?,
            None => result,
        };
        if let Some(found) = result.dtype() {
            produced.lock().get_or_insert(found);
        }
        // `ex` is a whole tile, so the block is stored as is.
        out.array.table().update(ex.clone(), Tile::new(ex.clone(), result)?)?;
        Ok(())
    })?;

    let out = match (dtype, produced.into_inner()) {
        (None, Some(found)) => out.keep().with_dtype(found),
        _ => out.keep(),
    };
    debug!(output = %out.id(), tiles = out.tiles().len(), "mapped array");
    Ok(out)
}
