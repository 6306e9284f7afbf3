//! The two process-wide flags: abort-requested and skip-evictions.
//!
//! These tests mutate process state, so they serialise on a local mutex.

use flowgraph::testing::*;
use flowgraph::{
    ErrorKind, ExecMode, OpOutput, abort_run, compose, operation, reset_abort,
    set_evictions_skipped,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Mutex;

static FLAGS: Mutex<()> = Mutex::new(());

fn aborting_pipeline() -> anyhow::Result<flowgraph::Pipeline> {
    let a = identity_op("A", "a", "b");
    let b = operation("B")
        .needs(["b"])
        .provides(["c"])
        .build(|_| {
            abort_run();
            Ok(OpOutput::Single(json!(null)))
        })?;
    let c = identity_op("C", "c", "d");
    Ok(compose("abortable").member(a).member(b).member(c).build()?)
}

fn assert_aborted_salvage(err: &flowgraph::FlowError) {
    assert!(err.is_aborted());
    let solution = err.salvage().solution.as_ref().unwrap();
    assert_eq!(
        solution,
        &BTreeMap::from([
            ("a".into(), json!(1)),
            ("b".into(), json!(1)),
            ("c".into(), json!(null)),
        ])
    );
    assert_eq!(
        err.salvage().executed.as_ref().unwrap(),
        &BTreeMap::from([
            ("A".to_string(), true),
            ("B".to_string(), true),
            ("C".to_string(), false),
        ])
    );
    assert!(err.salvage().plan.is_some());
}

#[test]
fn abort_stops_dispatch_and_salvages_progress() -> anyhow::Result<()> {
    let _guard = FLAGS.lock().unwrap();
    reset_abort();

    let pipeline = aborting_pipeline()?;
    let err = pipeline.run(&vals([("a", json!(1))])).unwrap_err();
    assert_aborted_salvage(&err);

    // The flag is process-wide and sticky: the next run aborts up front.
    let err = pipeline.run(&vals([("a", json!(1))])).unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(
        err.salvage().executed.as_ref().unwrap(),
        &BTreeMap::from([
            ("A".to_string(), false),
            ("B".to_string(), false),
            ("C".to_string(), false),
        ])
    );

    reset_abort();
    let sol = pipeline.run(&vals([("a", json!(1))]))?;
    assert_eq!(sol["d"], json!(null));
    Ok(())
}

#[test]
fn abort_behaves_the_same_in_parallel_mode() -> anyhow::Result<()> {
    let _guard = FLAGS.lock().unwrap();
    reset_abort();

    let pipeline = aborting_pipeline()?;
    pipeline.set_execution_method(ExecMode::Parallel);
    let err = pipeline.run(&vals([("a", json!(1))])).unwrap_err();
    assert_aborted_salvage(&err);

    reset_abort();
    Ok(())
}

#[test]
fn skipping_evictions_keeps_plans_eviction_free() -> anyhow::Result<()> {
    let _guard = FLAGS.lock().unwrap();

    let pipeline = compose("graph")
        .member(binary_op("add1", ["a", "b"], "ab", |x, y| x + y))
        .member(binary_op("add2", ["a", "ab"], "aab", |x, y| x + y))
        .build()?;
    let inputs = vals([("a", json!(1)), ("b", json!(3))]);

    set_evictions_skipped(true);
    let result = pipeline.compute(&inputs, Some(&outs(["aab"])));
    set_evictions_skipped(false);

    let sol = result?;
    assert_solution_eq(&sol, &vals([("aab", json!(5))]));
    let plan = pipeline.last_plan().unwrap();
    assert!(!plan.evictions_included());
    assert_eq!(plan.step_counts().1, 0);

    // With the flag clear the same request plans evictions again.
    let sol = pipeline.compute_with(&inputs, Some(&outs(["aab"])), true)?;
    assert_solution_eq(&sol, &vals([("aab", json!(5))]));
    assert!(pipeline.last_plan().unwrap().step_counts().1 > 0);
    Ok(())
}

#[test]
fn aborting_before_any_compute_runs_nothing() -> anyhow::Result<()> {
    let _guard = FLAGS.lock().unwrap();
    reset_abort();

    let pipeline = compose("t")
        .member(identity_op("only", "a", "b"))
        .build()?;
    abort_run();
    let err = pipeline.run(&vals([("a", json!(1))])).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Aborted));
    assert_eq!(
        err.salvage().solution.as_ref().unwrap(),
        &BTreeMap::from([("a".into(), json!(1))])
    );
    reset_abort();
    Ok(())
}
