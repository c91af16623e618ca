//! Expression compiler: array expressions to primitive op trees.
//!
//! Compilation is pure. Children are compiled depth-first before the node's
//! own operator is resolved, so an unsupported operator deep in a tree is
//! reported after everything beneath it compiled.

use super::expr::Expr;
use super::prims::{BinaryOp, MapKind, PrimitiveOp, ReduceKind};
use crate::error::{Error, Result};
use crate::tile::Field;
use tracing::trace;

pub fn compile(expr: &Expr) -> Result<PrimitiveOp> {
    let (name, children, axis) = match expr {
        Expr::Value(value) => return Ok(PrimitiveOp::Value(value.clone())),
        Expr::Op {
            name,
            children,
            axis,
        } => (name.as_str(), children, *axis),
    };
    let mut compiled = children.iter().map(compile).collect::<Result<Vec<_>>>()?;
    trace!(op = name, children = compiled.len(), "compiling op");

    if let Some(op) = BinaryOp::from_name(name) {
        if compiled.len() != 2 {
            return Err(Error::InvariantViolation {
                context: "binary operator arity",
                expected: format!("2 operands for {op}"),
                actual: format!("{} operands", compiled.len()),
            });
        }
        return Ok(PrimitiveOp::Map {
            children: compiled,
            kind: MapKind::Binary(op),
        });
    }

    let kind = match name {
        "sum" => ReduceKind::Sum,
        "argmin" => ReduceKind::Argmin,
        other => {
            return Err(Error::Unsupported {
                op: other.to_string(),
            })
        }
    };
    if compiled.len() != 1 {
        return Err(Error::InvariantViolation {
            context: "reduction arity",
            expected: format!("1 operand for {}", kind.name()),
            actual: format!("{} operands", compiled.len()),
        });
    }
    let axis = axis.ok_or_else(|| Error::InvariantViolation {
        context: "reduction axis",
        expected: format!("an axis for {}", kind.name()),
        actual: "none".to_string(),
    })?;
    let child = Box::new(compiled.remove(0));

    Ok(match kind {
        ReduceKind::Sum => PrimitiveOp::Reduce { child, axis, kind },
        ReduceKind::Argmin => PrimitiveOp::Map {
            children: vec![PrimitiveOp::Reduce { child, axis, kind }],
            kind: MapKind::ExtractField(Field::Idx),
        },
    })
}
