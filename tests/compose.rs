//! Composition: flattening, merge overrides, narrowing, surface
//! recomputation, plan caching.

use flowgraph::testing::*;
use flowgraph::{Dep, ErrorKind, OpOutput, compose, operation, optional};
use serde_json::json;
use std::sync::Arc;

#[test]
fn nested_pipelines_flatten_and_compute() -> anyhow::Result<()> {
    let graphop = compose("graphop")
        .member(binary_op("mul1", ["a", "b"], "ab", |a, b| a * b))
        .member(binary_op("sub1", ["a", "ab"], "a_minus_ab", |a, b| a - b))
        .member(unary_op("abspow1", "a_minus_ab", "cubed", |a| {
            (a.abs()).pow(3)
        }))
        .build()?;

    // A nested pipeline computes a tail of the graph on its own.
    let sol = graphop.run(&vals([("a_minus_ab", json!(-8))]))?;
    assert_solution_eq(
        &sol,
        &vals([("a_minus_ab", json!(-8)), ("cubed", json!(512))]),
    );

    let bigger = compose("bigger_graph")
        .member(&graphop)
        .member(binary_op("sub2", ["a_minus_ab", "c"], "final", |a, b| a - b))
        .build()?;
    let sol = bigger.compute(
        &vals([("a", json!(2)), ("b", json!(5)), ("c", json!(5))]),
        Some(&outs(["final"])),
    )?;
    assert_solution_eq(&sol, &vals([("final", json!(-13))]));
    Ok(())
}

#[test]
fn duplicate_operation_names_collapse_to_the_last() -> anyhow::Result<()> {
    let doubler = unary_op("op", "a", "out", |a| a * 2);
    let tripler = unary_op("op", "a", "out", |a| a * 3);

    let pipeline = compose("dups").member(doubler).member(tripler).build()?;
    assert_eq!(pipeline.operations().len(), 1);
    let sol = pipeline.run(&vals([("a", json!(5))]))?;
    assert_eq!(sol["out"], json!(15));
    Ok(())
}

#[test]
fn deep_merge_is_associative_on_operation_sets() -> anyhow::Result<()> {
    let a = unary_op("a", "x", "xa", |v| v + 1);
    let b = unary_op("b", "xa", "xb", |v| v + 10);
    let c = unary_op("c", "xb", "xc", |v| v + 100);

    let left = compose("left")
        .member(compose("ab").member(&a).member(&b).merge(true).build()?)
        .member(&c)
        .merge(true)
        .build()?;
    let right = compose("right")
        .member(&a)
        .member(compose("bc").member(&b).member(&c).merge(true).build()?)
        .merge(true)
        .build()?;

    let names = |p: &flowgraph::Pipeline| -> Vec<String> {
        p.operations().iter().map(|op| op.name().to_string()).collect()
    };
    assert_eq!(names(&left), names(&right));
    assert_eq!(
        left.run(&vals([("x", json!(1))]))?.as_map(),
        right.run(&vals([("x", json!(1))]))?.as_map()
    );
    Ok(())
}

#[test]
fn shallow_merge_remembers_subgraphs() -> anyhow::Result<()> {
    let inner = compose("inner")
        .member(unary_op("inc", "x", "y", |v| v + 1))
        .build()?;
    let shallow = compose("outer")
        .member(&inner)
        .member(unary_op("dec", "y", "z", |v| v - 1))
        .build()?;
    assert_eq!(
        shallow.subgraphs(),
        vec![("inner".to_string(), vec!["inc".to_string()])]
    );

    let deep = compose("outer")
        .member(&inner)
        .member(unary_op("dec", "y", "z", |v| v - 1))
        .merge(true)
        .build()?;
    assert!(deep.subgraphs().is_empty());
    Ok(())
}

fn optionality_ops() -> anyhow::Result<(flowgraph::Operation, flowgraph::Operation)> {
    let op1 = operation("op1")
        .needs([optional("a"), optional("bb")])
        .provides(["sum1"])
        .build(|args| {
            let a = args.kw("a").and_then(|v| v.as_i64()).unwrap_or(0);
            let bb = args.kw("bb").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(OpOutput::Single(json!(a + bb)))
        })?;
    let op2 = operation("op2")
        .needs(["a".into(), optional("bb")])
        .provides(["sum2"])
        .build(|args| {
            let a = args.pos(0).as_i64().unwrap();
            let bb = args.kw("bb").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(OpOutput::Single(json!(a + bb)))
        })?;
    Ok((op1, op2))
}

fn dep_strings(deps: &[Dep]) -> Vec<String> {
    deps.iter().map(|d| d.to_string()).collect()
}

#[test]
fn surface_optionality_is_recomputed() -> anyhow::Result<()> {
    let (op1, op2) = optionality_ops()?;
    let pipeline = compose("t").member(op1).member(op2).build()?;
    // `a` is required by op2; `bb` is optional everywhere.
    assert_eq!(dep_strings(&pipeline.needs()), ["'a'", "optional('bb')"]);
    assert_eq!(
        pipeline.provides(),
        [flowgraph::DataName::from("sum1"), "sum2".into()]
    );
    Ok(())
}

#[test]
fn narrowing_by_needs() -> anyhow::Result<()> {
    let (op1, op2) = optionality_ops()?;

    let narrowed = compose("t")
        .member(&op1)
        .member(&op2)
        .needs(["a"])
        .build()?;
    assert_eq!(dep_strings(&narrowed.needs()), ["'a'"]);
    assert_eq!(narrowed.operations().len(), 2);

    let narrowed = compose("t")
        .member(&op1)
        .member(&op2)
        .needs(["bb"])
        .build()?;
    // op2 requires the absent `a`, so only op1 survives and `bb` turns
    // optional at the surface.
    assert_eq!(dep_strings(&narrowed.needs()), ["optional('bb')"]);
    assert_eq!(
        narrowed.provides(),
        [flowgraph::DataName::from("sum1")]
    );
    Ok(())
}

#[test]
fn narrowing_by_provides() -> anyhow::Result<()> {
    let (op1, op2) = optionality_ops()?;

    let narrowed = compose("t")
        .member(&op1)
        .member(&op2)
        .provides(["sum1"])
        .build()?;
    assert_eq!(
        dep_strings(&narrowed.needs()),
        ["optional('a')", "optional('bb')"]
    );
    assert_eq!(narrowed.operations().len(), 1);

    let narrowed = compose("t")
        .member(&op1)
        .member(&op2)
        .provides(["sum2"])
        .build()?;
    assert_eq!(dep_strings(&narrowed.needs()), ["'a'", "optional('bb')"]);
    Ok(())
}

#[test]
fn narrowing_by_both_and_impossible_provides() -> anyhow::Result<()> {
    let (op1, op2) = optionality_ops()?;

    let narrowed = compose("t")
        .member(&op1)
        .member(&op2)
        .needs(["a"])
        .provides(["sum1"])
        .build()?;
    assert_eq!(dep_strings(&narrowed.needs()), ["optional('a')"]);

    let err = compose("t")
        .member(&op1)
        .member(&op2)
        .needs(["bb"])
        .provides(["sum2"])
        .build()
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ImpossibleProvides(names)
        if names == &["sum2".into()]));
    Ok(())
}

#[test]
fn narrowing_by_an_unknown_need_keeps_it_optional() -> anyhow::Result<()> {
    let (op1, op2) = optionality_ops()?;
    let narrowed = compose("t")
        .member(&op1)
        .member(&op2)
        .needs(["BAD"])
        .build()?;
    assert_eq!(dep_strings(&narrowed.needs()), ["optional('BAD')"]);
    assert_eq!(narrowed.provides(), [flowgraph::DataName::from("sum1")]);
    Ok(())
}

#[test]
fn narrow_is_idempotent() -> anyhow::Result<()> {
    let (op1, op2) = optionality_ops()?;
    let pipeline = compose("t").member(op1).member(op2).build()?;

    let inputs: Vec<Dep> = vec!["a".into()];
    let outputs = outs(["sum2"]);
    let once = pipeline.narrow(Some(&inputs), Some(&outputs))?;
    let twice = once.narrow(Some(&inputs), Some(&outputs))?;

    assert_eq!(dep_strings(&once.needs()), dep_strings(&twice.needs()));
    assert_eq!(once.provides(), twice.provides());
    let inp = vals([("a", json!(7))]);
    assert_eq!(once.run(&inp)?.as_map(), twice.run(&inp)?.as_map());
    Ok(())
}

#[test]
fn narrowed_pipeline_computes_the_narrow_surface() -> anyhow::Result<()> {
    let pipeline = compose("net")
        .member(binary_op("sum_op1", ["a", "b"], "sum1", |a, b| a + b))
        .member(binary_op("sum_op2", ["c", "d"], "sum2", |a, b| a + b))
        .member(binary_op("sum_op3", ["c", "sum2"], "sum3", |a, b| a + b))
        .build()?;

    let sol = pipeline.compute(
        &vals([("c", json!(2)), ("sum2", json!(5))]),
        Some(&outs(["sum3"])),
    )?;
    assert_solution_eq(&sol, &vals([("sum3", json!(7))]));

    let narrowed = pipeline.narrow(
        Some(&["c".into(), "sum2".into()]),
        Some(&outs(["sum3"])),
    )?;
    assert_eq!(narrowed.operations().len(), 1);
    let sol = narrowed.run(&vals([("c", json!(2)), ("sum2", json!(5))]))?;
    assert_eq!(sol["sum3"], json!(7));
    Ok(())
}

#[test]
fn pipeline_debug_shows_the_surface() -> anyhow::Result<()> {
    let (op1, op2) = optionality_ops()?;
    let pipeline = compose("t").member(op1).member(op2).build()?;
    assert_eq!(
        format!("{pipeline:?}"),
        "Pipeline(name='t', needs=['a', optional('bb')], provides=['sum1', 'sum2'])"
    );
    Ok(())
}

#[test]
fn plan_cache_hits_and_recompile() -> anyhow::Result<()> {
    let pipeline = compose("cache")
        .member(binary_op("add", ["a", "b"], "ab", |a, b| a + b))
        .build()?;
    let inp = vals([("a", json!(1)), ("b", json!(2))]);

    pipeline.run(&inp)?;
    let first = pipeline.last_plan().unwrap();
    pipeline.run(&inp)?;
    let second = pipeline.last_plan().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // A different request misses the cache.
    pipeline.compute(&inp, Some(&outs(["ab"])))?;
    let third = pipeline.last_plan().unwrap();
    assert!(!Arc::ptr_eq(&second, &third));

    // Same request again, but recompile forces fresh planning.
    pipeline.compute_with(&inp, Some(&outs(["ab"])), true)?;
    let fourth = pipeline.last_plan().unwrap();
    assert!(!Arc::ptr_eq(&third, &fourth));
    assert_eq!(third.steps(), fourth.steps());
    Ok(())
}

#[test]
fn shortcut_does_not_prune_upstream_of_other_needs() -> anyhow::Result<()> {
    // `given-2` is supplied, so `shortcuted` must not run; but `unjust`
    // still feeds `good_op`.
    let pipeline = compose("shortcut")
        .member(identity_op("unjust", "given-1", "a"))
        .member(binary_op("shortcuted", ["a", "b"], "given-2", |a, b| a + b))
        .member(binary_op("good_op", ["a", "given-2"], "asked", |a, b| a + b))
        .build()?;

    let inputs = vals([("given-1", json!(5)), ("b", json!(2)), ("given-2", json!(2))]);
    let sol = pipeline.run(&inputs)?;
    assert_solution_eq(
        &sol,
        &vals([
            ("given-1", json!(5)),
            ("given-2", json!(2)),
            ("a", json!(5)),
            ("b", json!(2)),
            ("asked", json!(7)),
        ]),
    );

    let sol = pipeline.compute(&inputs, Some(&outs(["asked"])))?;
    assert_solution_eq(&sol, &vals([("asked", json!(7))]));
    assert!(sol.overwrites().is_empty());
    Ok(())
}
