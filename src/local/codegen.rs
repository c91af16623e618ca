//! Compiled per-tile functions.
//!
//! A [`FunctionCompiler`] turns source text into a [`CompiledFn`] callable on
//! named tile inputs. [`Codegen`] sits in front of a compiler and caches the
//! result per exact source text; entries are built on first use and kept for
//! the lifetime of the runtime.
//!
//! The built-in compiler accepts a small elementwise expression language:
//!
//! ```text
//! expr    := compare
//! compare := sum (("==" | "<" | "<=" | ">" | ">=") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | power
//! power   := atom ("**" unary)?
//! atom    := number | name | name "(" expr ("," expr)* ")" | "(" expr ")"
//! ```
//!
//! Names that are not calls bind to inputs; the callable functions are
//! `abs`, `exp`, `sqrt`, `min` and `max`.

use crate::array::prims::BinaryOp;
use crate::error::{Error, Result};
use crate::tile::{DType, DenseTile, TileData};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Execution target requested from a compiled function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Host,
    Accelerator,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Host => write!(f, "host"),
            Backend::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// A compiled per-tile function. Inputs are passed by name.
pub trait CompiledFn: Send + Sync {
    fn call(&self, inputs: &BTreeMap<String, TileData>, backend: Backend) -> Result<TileData>;
}

/// Provider that builds callables from source text.
pub trait FunctionCompiler: Send + Sync {
    fn compile(&self, source: &str) -> anyhow::Result<Arc<dyn CompiledFn>>;
}

/// Source-keyed cache of compiled functions.
pub struct Codegen {
    compiler: Arc<dyn FunctionCompiler>,
    cache: DashMap<String, Arc<dyn CompiledFn>>,
    compilations: AtomicUsize,
}

impl fmt::Debug for Codegen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codegen")
            .field("cached", &self.cache.len())
            .field("compilations", &self.compilations.load(Ordering::Relaxed))
            .finish()
    }
}

impl Codegen {
    pub fn new(compiler: Arc<dyn FunctionCompiler>) -> Self {
        Self {
            compiler,
            cache: DashMap::new(),
            compilations: AtomicUsize::new(0),
        }
    }

    /// Cache in front of the built-in expression compiler.
    pub fn builtin() -> Self {
        Self::new(Arc::new(ExprCompiler))
    }

    /// Compiled function for `source`, building it on first request.
    pub fn get(&self, source: &str) -> Result<Arc<dyn CompiledFn>> {
        if let Some(hit) = self.cache.get(source) {
            return Ok(Arc::clone(hit.value()));
        }
        let entry = self.cache.entry(source.to_string());
        if let Entry::Occupied(hit) = &entry {
            return Ok(Arc::clone(hit.get()));
        }
        let compiled = self.compiler.compile(source).map_err(|cause| Error::Codegen {
            source_text: source.to_string(),
            cause,
        })?;
        self.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(len = source.len(), "compiled local function");
        Ok(Arc::clone(entry.or_insert(compiled).value()))
    }

    /// Number of distinct sources compiled so far.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Compiler for the built-in expression language.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprCompiler;

impl FunctionCompiler for ExprCompiler {
    fn compile(&self, source: &str) -> anyhow::Result<Arc<dyn CompiledFn>> {
        let ast = Parser::new(source).parse()?;
        Ok(Arc::new(ExprFn { ast }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Abs,
    Exp,
    Sqrt,
    Min,
    Max,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        Some(match name {
            "abs" => (Func::Abs, 1),
            "exp" => (Func::Exp, 1),
            "sqrt" => (Func::Sqrt, 1),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Number(f64, DType),
    Input(String),
    Neg(Box<Ast>),
    Binary(BinaryOp, Box<Ast>, Box<Ast>),
    Call(Func, Vec<Ast>),
}

struct ExprFn {
    ast: Ast,
}

impl CompiledFn for ExprFn {
    fn call(&self, inputs: &BTreeMap<String, TileData>, backend: Backend) -> Result<TileData> {
        if backend != Backend::Host {
            return Err(Error::BackendUnavailable {
                backend: backend.to_string(),
            });
        }
        eval(&self.ast, inputs)
    }
}

fn eval(ast: &Ast, inputs: &BTreeMap<String, TileData>) -> Result<TileData> {
    match ast {
        Ast::Number(v, dtype) => Ok(TileData::Dense(DenseTile::scalar(*v, *dtype))),
        Ast::Input(name) => inputs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingInput { name: name.clone() }),
        Ast::Neg(inner) => {
            let v = eval(inner, inputs)?;
            let dtype = match v.dtype() {
                Some(DType::F64) => DType::F64,
                _ => DType::I64,
            };
            v.map(dtype, |x| -x)
        }
        Ast::Binary(op, lhs, rhs) => op.eval(&eval(lhs, inputs)?, &eval(rhs, inputs)?),
        Ast::Call(func, args) => {
            let vals = args
                .iter()
                .map(|a| eval(a, inputs))
                .collect::<Result<Vec<_>>>()?;
            let dtype = |v: &TileData| v.dtype().unwrap_or(DType::F64);
            match (func, vals.as_slice()) {
                (Func::Abs, [x]) => x.map(dtype(x).sum_dtype(), f64::abs),
                (Func::Exp, [x]) => x.map(DType::F64, f64::exp),
                (Func::Sqrt, [x]) => x.map(DType::F64, f64::sqrt),
                (Func::Min, [a, b]) => {
                    a.zip_with(b, DType::promote(dtype(a), dtype(b)), f64::min)
                }
                (Func::Max, [a, b]) => {
                    a.zip_with(b, DType::promote(dtype(a), dtype(b)), f64::max)
                }
                _ => Err(Error::InvariantViolation {
                    context: "compiled call arity",
                    expected: format!("{func:?} arguments"),
                    actual: format!("{} arguments", vals.len()),
                }),
            }
        }
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn parse(mut self) -> anyhow::Result<Ast> {
        let ast = self.parse_compare()?;
        self.skip_whitespace();
        if !self.is_eof() {
            anyhow::bail!("unexpected `{}` at offset {}", self.rest(), self.pos);
        }
        Ok(ast)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    /// Consume `token` if it is next.
    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> anyhow::Result<()> {
        if !self.eat(token) {
            anyhow::bail!("expected `{token}` at offset {}", self.pos);
        }
        Ok(())
    }

    fn parse_compare(&mut self) -> anyhow::Result<Ast> {
        let lhs = self.parse_sum()?;
        // Two-character operators first.
        let op = if self.eat("==") {
            BinaryOp::Equal
        } else if self.eat("<=") {
            BinaryOp::LessEqual
        } else if self.eat(">=") {
            BinaryOp::GreaterEqual
        } else if self.eat("<") {
            BinaryOp::Less
        } else if self.eat(">") {
            BinaryOp::Greater
        } else {
            return Ok(lhs);
        };
        let rhs = self.parse_sum()?;
        Ok(Ast::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> anyhow::Result<Ast> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Subtract
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_product()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> anyhow::Result<Ast> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = if self.rest().starts_with("**") {
                return Ok(lhs);
            } else if self.eat("*") {
                BinaryOp::Multiply
            } else if self.eat("/") {
                BinaryOp::Divide
            } else if self.eat("%") {
                BinaryOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> anyhow::Result<Ast> {
        if self.eat("-") {
            return Ok(Ast::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> anyhow::Result<Ast> {
        let base = self.parse_atom()?;
        if self.eat("**") {
            let exp = self.parse_unary()?;
            return Ok(Ast::Binary(BinaryOp::Power, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> anyhow::Result<Ast> {
        self.skip_whitespace();
        if self.eat("(") {
            let inner = self.parse_compare()?;
            self.expect(")")?;
            return Ok(inner);
        }
        let rest = self.rest();
        let Some(first) = rest.chars().next() else {
            anyhow::bail!("unexpected end of input");
        };

        if first.is_ascii_digit() || first == '.' {
            let len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            let literal = &rest[..len];
            let value: f64 = literal
                .parse()
                .map_err(|_| anyhow::anyhow!("bad number `{literal}` at offset {}", self.pos))?;
            let dtype = if literal.contains('.') {
                DType::F64
            } else {
                DType::I64
            };
            self.pos += len;
            return Ok(Ast::Number(value, dtype));
        }

        if first.is_ascii_alphabetic() || first == '_' {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let name = &rest[..len];
            self.pos += len;
            if !self.eat("(") {
                return Ok(Ast::Input(name.to_string()));
            }
            let Some((func, arity)) = Func::lookup(name) else {
                anyhow::bail!("unknown function `{name}`");
            };
            let mut args = vec![self.parse_compare()?];
            while self.eat(",") {
                args.push(self.parse_compare()?);
            }
            self.expect(")")?;
            if args.len() != arity {
                anyhow::bail!("`{name}` takes {arity} argument(s), got {}", args.len());
            }
            return Ok(Ast::Call(func, args));
        }

        anyhow::bail!("unexpected `{first}` at offset {}", self.pos)
    }
}
