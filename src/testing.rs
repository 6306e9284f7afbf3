//! Utilities for testing pipelines: solution assertions and quick
//! operation constructors over integer JSON values.
//!
//! ```
//! use flowgraph::compose;
//! use flowgraph::testing::*;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = compose("t")
//!     .member(binary_op("add", ["a", "b"], "ab", |a, b| a + b))
//!     .build()?;
//! let sol = pipeline.run(&vals([("a", json!(1)), ("b", json!(2))]))?;
//! assert_solution_eq(&sol, &vals([("a", json!(1)), ("b", json!(2)), ("ab", json!(3))]));
//! # Ok(())
//! # }
//! ```

use crate::dep::{DataName, Dep};
use crate::op::{OpOutput, Operation, operation};
use crate::solution::Solution;
use anyhow::Context;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Build a name-to-value mapping from `(name, value)` pairs.
pub fn vals<I>(pairs: I) -> BTreeMap<DataName, Value>
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (DataName::from(k), v))
        .collect()
}

/// Build an output-name list from strings.
pub fn outs<I>(names: I) -> Vec<DataName>
where
    I: IntoIterator<Item = &'static str>,
{
    names.into_iter().map(DataName::from).collect()
}

/// Assert a solution equals the expected mapping, with a readable diff.
#[track_caller]
pub fn assert_solution_eq(sol: &Solution, expected: &BTreeMap<DataName, Value>) {
    assert!(
        sol == expected,
        "solution mismatch:\n   got: {sol}\n  want: {expected:?}"
    );
}

/// A one-need, one-provide integer operation.
///
/// # Panics
///
/// On invalid names; test helpers fail loudly.
pub fn unary_op(
    name: &str,
    need: &str,
    provides: &str,
    f: impl Fn(i64) -> i64 + Send + Sync + 'static,
) -> Operation {
    operation(name)
        .needs([need])
        .provides([provides])
        .build(move |args| {
            let a = args.pos(0).as_i64().context("integer argument")?;
            Ok(OpOutput::Single(json!(f(a))))
        })
        .expect("valid operation")
}

/// A two-need, one-provide integer operation.
///
/// # Panics
///
/// On invalid names; test helpers fail loudly.
pub fn binary_op(
    name: &str,
    needs: [&str; 2],
    provides: &str,
    f: impl Fn(i64, i64) -> i64 + Send + Sync + 'static,
) -> Operation {
    operation(name)
        .needs(needs)
        .provides([provides])
        .build(move |args| {
            let a = args.pos(0).as_i64().context("integer argument")?;
            let b = args.pos(1).as_i64().context("integer argument")?;
            Ok(OpOutput::Single(json!(f(a, b))))
        })
        .expect("valid operation")
}

/// Pass the single need through unchanged.
///
/// # Panics
///
/// On invalid names; test helpers fail loudly.
pub fn identity_op(name: &str, need: &str, provides: &str) -> Operation {
    operation(name)
        .needs([need])
        .provides([provides])
        .build(|args| Ok(OpOutput::Single(args.pos(0).clone())))
        .expect("valid operation")
}

/// Sum every bound argument: positional, vararg and keyword alike.
/// Handy for exercising `vararg`/`varargs`/`optional` binding.
///
/// # Panics
///
/// On invalid names; test helpers fail loudly.
pub fn addall_op<I, D>(name: &str, needs: I, provides: &str) -> Operation
where
    I: IntoIterator<Item = D>,
    D: Into<Dep>,
{
    operation(name)
        .needs(needs)
        .provides([provides])
        .build(|args| {
            let mut total = 0i64;
            for v in args.iter_flat() {
                total += v.as_i64().context("integer argument")?;
            }
            for v in args.keywords().values() {
                total += v.as_i64().context("integer argument")?;
            }
            Ok(OpOutput::Single(json!(total)))
        })
        .expect("valid operation")
}
