//! # Local Module
//!
//! Tile-level expression DAG. A [`LocalExpr`] is evaluated against one
//! [`LocalCtx`], which binds input names to concrete tiles; the result is a
//! single tile. Three node kinds exist:
//!
//! - `Input` reads a named tile from the context.
//! - `FnCall` evaluates its dependencies and calls a Rust function on them.
//! - `Compiled` hands every input feeding it to a function compiled from
//!   source text by the runtime's [`codegen::Codegen`].
//!
//! Nodes are shared through `Arc`, so one subgraph may feed several parents.
//! With `memoize_shared` set, each node is evaluated once per pass.

pub mod codegen;

use crate::config::LocalConfig;
use crate::error::{Error, Result};
use crate::extent::Extent;
use crate::tile::TileData;
use codegen::{Backend, Codegen};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug_span, instrument};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed keyword argument of a function call node.
#[derive(Debug, Clone, PartialEq)]
pub enum KwArg {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Extent(Extent),
}

impl KwArg {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            KwArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            KwArg::Float(v) => Some(*v),
            KwArg::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_extent(&self) -> Option<&Extent> {
        match self {
            KwArg::Extent(ex) => Some(ex),
            _ => None,
        }
    }
}

pub type Kwargs = BTreeMap<String, KwArg>;

/// Function called by a `FnCall` node: evaluated dependencies in order, plus
/// the node's keyword arguments.
pub type LocalFn = Arc<dyn Fn(&[TileData], &Kwargs) -> Result<TileData> + Send + Sync>;

pub enum LocalNode {
    Input {
        name: String,
    },
    FnCall {
        /// Diagnostic name of the function.
        name: String,
        func: LocalFn,
        kwargs: Kwargs,
        deps: Vec<Arc<LocalExpr>>,
    },
    Compiled {
        source: String,
        deps: Vec<Arc<LocalExpr>>,
    },
}

/// A node of the local DAG.
pub struct LocalExpr {
    id: u64,
    node: LocalNode,
}

impl fmt::Debug for LocalExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            LocalNode::Input { name } => write!(f, "Input#{}({name})", self.id),
            LocalNode::FnCall {
                name, kwargs, deps, ..
            } => f
                .debug_struct(&format!("FnCall#{}", self.id))
                .field("fn", name)
                .field("kwargs", kwargs)
                .field("deps", deps)
                .finish(),
            LocalNode::Compiled { source, deps } => f
                .debug_struct(&format!("Compiled#{}", self.id))
                .field("source", source)
                .field("deps", deps)
                .finish(),
        }
    }
}

/// Evaluation context for one tile.
pub struct LocalCtx<'a> {
    pub inputs: BTreeMap<String, TileData>,
    pub codegen: &'a Codegen,
    pub config: &'a LocalConfig,
}

impl<'a> LocalCtx<'a> {
    pub fn new(codegen: &'a Codegen, config: &'a LocalConfig) -> Self {
        Self {
            inputs: BTreeMap::new(),
            codegen,
            config,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: TileData) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    fn input(&self, name: &str) -> Result<&TileData> {
        self.inputs.get(name).ok_or_else(|| Error::MissingInput {
            name: name.to_string(),
        })
    }

    fn backend(&self) -> Backend {
        if self.config.use_accelerator {
            Backend::Accelerator
        } else {
            Backend::Host
        }
    }
}

impl LocalExpr {
    fn alloc(node: LocalNode) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            node,
        })
    }

    pub fn input(name: impl Into<String>) -> Arc<Self> {
        Self::alloc(LocalNode::Input { name: name.into() })
    }

    pub fn fn_call(
        name: impl Into<String>,
        func: LocalFn,
        kwargs: Kwargs,
        deps: Vec<Arc<LocalExpr>>,
    ) -> Arc<Self> {
        Self::alloc(LocalNode::FnCall {
            name: name.into(),
            func,
            kwargs,
            deps,
        })
    }

    pub fn compiled(source: impl Into<String>, deps: Vec<Arc<LocalExpr>>) -> Arc<Self> {
        Self::alloc(LocalNode::Compiled {
            source: source.into(),
            deps,
        })
    }

    /// Process-unique node id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn node(&self) -> &LocalNode {
        &self.node
    }

    pub fn deps(&self) -> &[Arc<LocalExpr>] {
        match &self.node {
            LocalNode::Input { .. } => &[],
            LocalNode::FnCall { deps, .. } | LocalNode::Compiled { deps, .. } => deps,
        }
    }

    /// Names of every input reachable from this node, deduplicated and sorted.
    pub fn input_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        let mut stack: Vec<&LocalExpr> = vec![self];
        while let Some(expr) = stack.pop() {
            if let LocalNode::Input { name } = &expr.node {
                names.insert(name.clone());
            }
            stack.extend(expr.deps().iter().map(|d| d.as_ref()));
        }
        names.into_iter().collect()
    }

    #[instrument(skip_all, fields(node = self.id), level = "debug")]
    pub fn evaluate(&self, ctx: &LocalCtx<'_>) -> Result<TileData> {
        let mut memo = FxHashMap::default();
        self.eval_with(ctx, &mut memo)
    }

    fn eval_with(
        &self,
        ctx: &LocalCtx<'_>,
        memo: &mut FxHashMap<u64, TileData>,
    ) -> Result<TileData> {
        if let Some(limit) = ctx.config.max_deps {
            let found = self.deps().len();
            if found > limit {
                return Err(Error::TooManyDependencies {
                    node: self.id,
                    limit,
                    found,
                });
            }
        }
        if ctx.config.memoize_shared {
            if let Some(hit) = memo.get(&self.id) {
                return Ok(hit.clone());
            }
        }

        let value = match &self.node {
            LocalNode::Input { name } => ctx.input(name)?.clone(),
            LocalNode::FnCall {
                name,
                func,
                kwargs,
                deps,
            } => {
                let args = deps
                    .iter()
                    .map(|d| d.eval_with(ctx, memo))
                    .collect::<Result<Vec<_>>>()?;
                let _span = debug_span!("local_fn", node = self.id, name = %name).entered();
                func(&args, kwargs)?
            }
            LocalNode::Compiled { source, .. } => {
                let names = self.input_names();
                let mut bound = BTreeMap::new();
                for name in names {
                    let value = ctx.input(&name)?.clone();
                    bound.insert(name, value);
                }
                let compiled = ctx.codegen.get(source)?;
                let _span = debug_span!("compiled_fn", node = self.id).entered();
                compiled.call(&bound, ctx.backend())?
            }
        };

        if ctx.config.memoize_shared && !self.deps().is_empty() {
            memo.insert(self.id, value.clone());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{DType, DenseTile};
    use std::sync::atomic::AtomicUsize;

    fn tile(values: &[f64]) -> TileData {
        TileData::Dense(DenseTile::new(vec![values.len()], DType::F64, values.to_vec()).unwrap())
    }

    fn values(t: &TileData) -> Vec<f64> {
        t.to_dense().unwrap().data().to_vec()
    }

    fn add_fn() -> LocalFn {
        Arc::new(|args: &[TileData], _kw: &Kwargs| {
            args[0].zip_with(&args[1], DType::F64, |a, b| a + b)
        })
    }

    #[test]
    fn fn_call_evaluates_deps_and_kwargs() {
        let codegen = Codegen::builtin();
        let config = LocalConfig::default();
        let scale: LocalFn = Arc::new(|args: &[TileData], kw: &Kwargs| {
            let by = kw.get("by").and_then(KwArg::as_float).unwrap_or(1.0);
            args[0].map(DType::F64, |v| v * by)
        });
        let mut kwargs = Kwargs::new();
        kwargs.insert("by".to_string(), KwArg::Int(3));
        let expr = LocalExpr::fn_call(
            "scale",
            scale,
            kwargs,
            vec![LocalExpr::fn_call(
                "add",
                add_fn(),
                Kwargs::new(),
                vec![LocalExpr::input("a"), LocalExpr::input("b")],
            )],
        );
        let ctx = LocalCtx::new(&codegen, &config)
            .with_input("a", tile(&[1.0, 2.0]))
            .with_input("b", tile(&[10.0, 20.0]));
        assert_eq!(values(&expr.evaluate(&ctx).unwrap()), vec![33.0, 66.0]);
    }

    #[test]
    fn input_names_are_transitive_and_deduplicated() {
        let a = LocalExpr::input("a");
        let deps = vec![a.clone(), LocalExpr::input("b")];
        let inner = LocalExpr::fn_call("add", add_fn(), Kwargs::new(), deps);
        let outer = LocalExpr::compiled("a + b", vec![inner, a]);
        assert_eq!(outer.input_names(), vec!["a".to_string(), "b".to_string()]);
        assert_ne!(outer.id(), outer.deps()[0].id());
    }

    #[test]
    fn compiled_node_binds_inputs_by_name() {
        let codegen = Codegen::builtin();
        let config = LocalConfig::default();
        let inputs = vec![LocalExpr::input("x"), LocalExpr::input("y")];
        let expr = LocalExpr::compiled("x * y + 1", inputs);
        let ctx = LocalCtx::new(&codegen, &config)
            .with_input("x", tile(&[2.0, 3.0]))
            .with_input("y", tile(&[4.0, 5.0]));
        assert_eq!(values(&expr.evaluate(&ctx).unwrap()), vec![9.0, 16.0]);
        expr.evaluate(&ctx).unwrap();
        assert_eq!(codegen.compilations(), 1);
    }

    #[test]
    fn compiled_node_honours_accelerator_flag() {
        let codegen = Codegen::builtin();
        let config = LocalConfig {
            use_accelerator: true,
            ..LocalConfig::default()
        };
        let expr = LocalExpr::compiled("x", vec![LocalExpr::input("x")]);
        let ctx = LocalCtx::new(&codegen, &config).with_input("x", tile(&[1.0]));
        assert!(matches!(
            expr.evaluate(&ctx),
            Err(Error::BackendUnavailable { backend }) if backend == "accelerator"
        ));
    }

    #[test]
    fn missing_input_is_named() {
        let codegen = Codegen::builtin();
        let config = LocalConfig::default();
        let ctx = LocalCtx::new(&codegen, &config);
        match LocalExpr::input("nope").evaluate(&ctx) {
            Err(Error::MissingInput { name }) => assert_eq!(name, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn shared_nodes_are_memoized_when_enabled() {
        let codegen = Codegen::builtin();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let counted: LocalFn = Arc::new(move |args: &[TileData], _kw: &Kwargs| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args[0].clone())
        });
        let shared =
            LocalExpr::fn_call("counted", counted, Kwargs::new(), vec![LocalExpr::input("a")]);
        let root = LocalExpr::fn_call("add", add_fn(), Kwargs::new(), vec![shared.clone(), shared]);

        for (memoize, expected) in [(true, 1), (false, 2)] {
            calls.store(0, Ordering::SeqCst);
            let config = LocalConfig {
                memoize_shared: memoize,
                ..LocalConfig::default()
            };
            let ctx = LocalCtx::new(&codegen, &config).with_input("a", tile(&[1.5]));
            assert_eq!(values(&root.evaluate(&ctx).unwrap()), vec![3.0]);
            assert_eq!(calls.load(Ordering::SeqCst), expected);
        }
    }

    #[test]
    fn dependency_cap_is_enforced() {
        let codegen = Codegen::builtin();
        let config = LocalConfig {
            max_deps: Some(2),
            ..LocalConfig::default()
        };
        let expr = LocalExpr::compiled(
            "a + b + c",
            vec![LocalExpr::input("a"), LocalExpr::input("b"), LocalExpr::input("c")],
        );
        let ctx = LocalCtx::new(&codegen, &config);
        assert!(matches!(
            expr.evaluate(&ctx),
            Err(Error::TooManyDependencies { limit: 2, found: 3, .. })
        ));
    }
}
