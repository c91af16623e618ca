use std::sync::Arc;

use spartan_rs::config::LocalConfig;
use spartan_rs::local::LocalFn;
use spartan_rs::{Codegen, DType, DenseTile, Error, KwArg, Kwargs, LocalCtx, LocalExpr, TileData};

mod support;

fn block(values: &[f64]) -> TileData {
    TileData::Dense(DenseTile::new(vec![values.len()], DType::F64, values.to_vec()).unwrap())
}

#[test]
fn compiled_node_binds_inputs_by_name() {
    let codegen = Codegen::builtin();
    let config = LocalConfig::default();
    let expr = LocalExpr::compiled(
        "abs(a - b) ** 2",
        vec![LocalExpr::input("a"), LocalExpr::input("b")],
    );
    let ctx = LocalCtx::new(&codegen, &config)
        .with_input("a", block(&[1.0, 5.0]))
        .with_input("b", block(&[4.0, 2.0]));
    let out = expr.evaluate(&ctx).unwrap();
    assert_eq!(support::dense(&out).data(), &[9.0, 9.0]);
}

#[test]
fn missing_input_is_reported_by_name() {
    let codegen = Codegen::builtin();
    let config = LocalConfig::default();
    let expr = LocalExpr::compiled("x + y", vec![LocalExpr::input("x"), LocalExpr::input("y")]);
    let ctx = LocalCtx::new(&codegen, &config).with_input("x", block(&[1.0]));
    match expr.evaluate(&ctx) {
        Err(Error::MissingInput { name }) => assert_eq!(name, "y"),
        other => panic!("expected missing input, got {other:?}"),
    }
}

#[test]
fn bad_source_is_a_codegen_error() {
    let codegen = Codegen::builtin();
    let config = LocalConfig::default();
    let expr = LocalExpr::compiled("x +* 2", vec![LocalExpr::input("x")]);
    let ctx = LocalCtx::new(&codegen, &config).with_input("x", block(&[1.0]));
    match expr.evaluate(&ctx) {
        Err(Error::Codegen { source_text, .. }) => assert_eq!(source_text, "x +* 2"),
        other => panic!("expected codegen error, got {other:?}"),
    }
    assert_eq!(codegen.cached(), 0);
}

#[test]
fn accelerator_backend_is_unavailable() {
    let codegen = Codegen::builtin();
    let config = LocalConfig {
        use_accelerator: true,
        ..LocalConfig::default()
    };
    let expr = LocalExpr::compiled("x", vec![LocalExpr::input("x")]);
    let ctx = LocalCtx::new(&codegen, &config).with_input("x", block(&[1.0]));
    assert!(matches!(
        expr.evaluate(&ctx),
        Err(Error::BackendUnavailable { .. })
    ));
}

#[test]
fn fn_call_receives_kwargs_and_dependency_values() {
    let codegen = Codegen::builtin();
    let config = LocalConfig::default();
    let scale: LocalFn = Arc::new(|args: &[TileData], kwargs: &Kwargs| {
        let factor = kwargs.get("factor").and_then(KwArg::as_float).unwrap_or(1.0);
        args[0].map(DType::F64, |v| v * factor)
    });
    let mut kwargs = Kwargs::new();
    kwargs.insert("factor".to_string(), KwArg::Float(3.0));
    let expr = LocalExpr::fn_call("scale", scale, kwargs, vec![LocalExpr::input("x")]);
    let ctx = LocalCtx::new(&codegen, &config).with_input("x", block(&[1.0, -2.0]));
    assert_eq!(support::dense(&expr.evaluate(&ctx).unwrap()).data(), &[3.0, -6.0]);
}

#[test]
fn dependency_cap_is_enforced() {
    let codegen = Codegen::builtin();
    let config = LocalConfig {
        max_deps: Some(1),
        ..LocalConfig::default()
    };
    let expr = LocalExpr::compiled("a + b", vec![LocalExpr::input("a"), LocalExpr::input("b")]);
    let ctx = LocalCtx::new(&codegen, &config)
        .with_input("a", block(&[1.0]))
        .with_input("b", block(&[2.0]));
    assert!(matches!(
        expr.evaluate(&ctx),
        Err(Error::TooManyDependencies { limit: 1, found: 2, .. })
    ));
}
