//! Lazy array expressions.

use super::prims::{BinaryOp, Constant};
use super::{compile, eval, DistArray};
use crate::error::Result;
use crate::table::Master;
use tracing::instrument;

/// Array expression tree. Leaves hold concrete values; interior nodes name
/// an operator, its operands and an optional `axis` keyword.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value(Constant),
    Op {
        name: String,
        children: Vec<Expr>,
        axis: Option<usize>,
    },
}

impl From<DistArray> for Expr {
    fn from(array: DistArray) -> Self {
        Expr::Value(Constant::Array(array))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Value(Constant::Scalar(value))
    }
}

impl Expr {
    pub fn array(array: DistArray) -> Self {
        array.into()
    }

    pub fn scalar(value: f64) -> Self {
        value.into()
    }

    /// Any operator by name. Names outside the compiler's set fail at
    /// compile time.
    pub fn op(name: impl Into<String>, children: Vec<Expr>, axis: Option<usize>) -> Self {
        Expr::Op {
            name: name.into(),
            children,
            axis,
        }
    }

    pub fn binary(op: BinaryOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Self::op(op.name(), vec![lhs.into(), rhs.into()], None)
    }

    pub fn add(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Add, self, rhs)
    }

    pub fn subtract(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Subtract, self, rhs)
    }

    pub fn multiply(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Multiply, self, rhs)
    }

    pub fn divide(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Divide, self, rhs)
    }

    pub fn modulo(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Mod, self, rhs)
    }

    pub fn power(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Power, self, rhs)
    }

    pub fn equal(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Equal, self, rhs)
    }

    pub fn less(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Less, self, rhs)
    }

    pub fn less_equal(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::LessEqual, self, rhs)
    }

    pub fn greater(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Greater, self, rhs)
    }

    pub fn greater_equal(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::GreaterEqual, self, rhs)
    }

    pub fn sum(self, axis: usize) -> Self {
        Self::op("sum", vec![self], Some(axis))
    }

    pub fn argmin(self, axis: usize) -> Self {
        Self::op("argmin", vec![self], Some(axis))
    }

    /// Compile and run against `master`.
    #[instrument(skip_all, level = "debug")]
    pub fn evaluate(&self, master: &Master) -> Result<DistArray> {
        let op = compile(self)?;
        eval::execute(master, &op)
    }
}
