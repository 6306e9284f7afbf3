//! Binding semantics of the needs-side modifiers: optional, keyword
//! aliases, vararg and varargs.

use flowgraph::testing::*;
use flowgraph::{OpOutput, compose, operation, optional, optional_kw, vararg, varargs};
use serde_json::json;

#[test]
fn optional_need_is_skipped_when_absent() -> anyhow::Result<()> {
    let sum = operation("sum")
        .needs(["a".into(), "b".into(), optional("c")])
        .provides(["sum"])
        .build(|args| {
            let a = args.pos(0).as_i64().unwrap();
            let b = args.pos(1).as_i64().unwrap();
            let c = args.kw("c").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(OpOutput::Single(json!(a + b + c)))
        })?;
    let pipeline = compose("t").member(sum).build()?;

    let sol = pipeline.run(&vals([("a", json!(4)), ("b", json!(3)), ("c", json!(2))]))?;
    assert_eq!(sol["sum"], json!(9));

    let sol = pipeline.run(&vals([("a", json!(4)), ("b", json!(3))]))?;
    assert_eq!(sol["sum"], json!(7));
    Ok(())
}

#[test]
fn optional_keyword_alias_binds_under_the_alias() -> anyhow::Result<()> {
    let scale = operation("scale")
        .needs(["x".into(), optional_kw("scale-factor", "factor")])
        .provides(["scaled"])
        .build(|args| {
            let x = args.pos(0).as_i64().unwrap();
            let f = args.kw("factor").and_then(|v| v.as_i64()).unwrap_or(1);
            Ok(OpOutput::Single(json!(x * f)))
        })?;
    let pipeline = compose("t").member(scale).build()?;

    let sol = pipeline.run(&vals([("x", json!(3)), ("scale-factor", json!(4))]))?;
    assert_eq!(sol["scaled"], json!(12));

    let sol = pipeline.run(&vals([("x", json!(3))]))?;
    assert_eq!(sol["scaled"], json!(3));
    Ok(())
}

#[test]
fn vararg_needs_accumulate_in_declaration_order() -> anyhow::Result<()> {
    let pipeline = compose("t")
        .member(addall_op("sum1", [vararg("a"), vararg("b")], "sum1"))
        .member(addall_op("sum2", [vararg("a"), "b".into()], "sum2"))
        .member(binary_op("sum3", ["sum1", "c"], "sum3", |a, b| a + b))
        .build()?;

    let sol = pipeline.run(&vals([("a", json!(1)), ("b", json!(2)), ("c", json!(4))]))?;
    assert_solution_eq(
        &sol,
        &vals([
            ("a", json!(1)),
            ("b", json!(2)),
            ("c", json!(4)),
            ("sum1", json!(3)),
            ("sum2", json!(3)),
            ("sum3", json!(7)),
        ]),
    );

    // A missing vararg never blocks the operation.
    let sol = pipeline.run(&vals([("b", json!(2)), ("c", json!(4))]))?;
    assert_eq!(sol["sum1"], json!(2));
    assert_eq!(sol["sum2"], json!(2));
    Ok(())
}

#[test]
fn varargs_flattens_an_array_value() -> anyhow::Result<()> {
    let concat = operation("concat")
        .needs([varargs("words")])
        .provides(["joined"])
        .build(|args| {
            let joined: Vec<&str> = args
                .varargs()
                .iter()
                .filter_map(|v| v.as_str())
                .collect();
            Ok(OpOutput::Single(json!(joined.join(" "))))
        })?;
    let pipeline = compose("t").member(concat).build()?;

    let sol = pipeline.run(&vals([("words", json!(["lazy", "dog"]))]))?;
    assert_eq!(sol["joined"], json!("lazy dog"));
    Ok(())
}

#[test]
fn vararg_surfaces_as_optional() -> anyhow::Result<()> {
    let pipeline = compose("t")
        .member(addall_op("sum1", [vararg("a"), "b".into()], "sum1"))
        .build()?;
    let needs = pipeline.needs();
    assert_eq!(needs.len(), 2);
    assert!(needs[0].is_optional());
    assert_eq!(needs[0].name().as_str(), "a");
    assert!(!needs[1].is_optional());
    Ok(())
}

#[test]
fn optional_and_required_providers_of_the_same_output() -> anyhow::Result<()> {
    let add = binary_op("add", ["a", "b"], "a+-b", |a, b| a + b);
    let sub_opt = operation("sub_opt")
        .needs(["a".into(), optional("b")])
        .provides(["a+-b"])
        .build(|args| {
            let a = args.pos(0).as_i64().unwrap();
            let b = args.kw("b").and_then(|v| v.as_i64()).unwrap_or(10);
            Ok(OpOutput::Single(json!(a - b)))
        })?;

    // Normal order: with both inputs the first provider wins; with only
    // `a` the optional-need provider is the only satisfiable one.
    let pipeline = compose("partial_optionals")
        .member(&add)
        .member(&sub_opt)
        .build()?;
    assert_eq!(
        pipeline.run(&vals([("a", json!(1)), ("b", json!(2))]))?["a+-b"],
        json!(3)
    );
    assert_eq!(pipeline.run(&vals([("a", json!(1))]))?["a+-b"], json!(-9));

    // Inverse order flips the tie-break.
    let pipeline = compose("partial_optionals")
        .member(&sub_opt)
        .member(&add)
        .build()?;
    assert_eq!(
        pipeline.run(&vals([("a", json!(1)), ("b", json!(2))]))?["a+-b"],
        json!(-1)
    );
    assert_eq!(pipeline.run(&vals([("a", json!(1))]))?["a+-b"], json!(-9));
    Ok(())
}
