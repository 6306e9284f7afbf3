//! # Flowgraph
//!
//! Lightweight **computation graphs**: declare named operations with needs
//! and provides, compose them into a pipeline, and compute any subset of
//! outputs from any subset of inputs. The planner prunes operations that
//! cannot or need not run, linearises the survivors deterministically, and
//! inserts memory-eviction and value-pinning instructions; the runner
//! executes the plan sequentially or with bounded parallelism.
//!
//! ## Quick start
//!
//! ```
//! use flowgraph::{OpOutput, compose, operation};
//! use serde_json::json;
//! use std::collections::BTreeMap;
//!
//! # fn main() -> anyhow::Result<()> {
//! let add = operation("add")
//!     .needs(["a", "b"])
//!     .provides(["ab"])
//!     .build(|args| {
//!         let a = args.pos(0).as_i64().unwrap_or(0);
//!         let b = args.pos(1).as_i64().unwrap_or(0);
//!         Ok(OpOutput::Single(json!(a + b)))
//!     })?;
//! let double = operation("double")
//!     .needs(["ab"])
//!     .provides(["ab2"])
//!     .build(|args| Ok(OpOutput::Single(json!(args.pos(0).as_i64().unwrap_or(0) * 2))))?;
//!
//! let pipeline = compose("example").member(add).member(double).build()?;
//!
//! let inputs = BTreeMap::from([("a".into(), json!(1)), ("b".into(), json!(2))]);
//! let solution = pipeline.run(&inputs)?;
//! assert_eq!(solution["ab"], json!(3));
//! assert_eq!(solution["ab2"], json!(6));
//!
//! // Ask for specific outputs and only the necessary operations run.
//! let solution = pipeline.compute(&inputs, Some(&["ab".into()]))?;
//! assert_eq!(solution.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core concepts
//!
//! - **Operation** ([`operation`]): an immutable descriptor binding a
//!   callable to ordered needs and provides. Needs may be [`optional`],
//!   [`vararg`]/[`varargs`], pure [`sideffect`]s, or [`sfxed`] combinations.
//! - **Pipeline** ([`compose`]): a flattened set of operations with a
//!   recomputed surface, narrowable by needs/provides, caching its last
//!   [`Plan`].
//! - **Plan**: the ordered `Compute`/`Evict`/`Pin` steps for one request;
//!   inspect it through [`Pipeline::last_plan`] (it prints every step).
//! - **Solution**: the name-to-value mapping a run returns, including the
//!   untouched inputs when no outputs were requested.
//!
//! Values are [`serde_json::Value`]; callables receive a [`Bindings`] view
//! of exactly the arguments their declaration asked for and return an
//! [`OpOutput`].
//!
//! ## Planning semantics worth knowing
//!
//! - Operations whose required needs are unreachable are pruned, not
//!   errors; requesting an output the graph does not know *is* an error.
//! - When several operations provide the same name, the one composed first
//!   wins; the others do not run for that name.
//! - A user-supplied input that a surviving operation would overwrite is
//!   *pinned*: downstream readers and the final solution see the user's
//!   value, and the displaced computed value goes to the overwrites
//!   collector ([`Pipeline::set_overwrites_collector`]).
//!
//! ## Parallel execution and cancellation
//!
//! [`Pipeline::set_execution_method`] switches a pipeline to parallel
//! dispatch over a [`WorkerPool`] (rayon-backed by default, replaceable via
//! [`Pipeline::set_worker_pool`]). Results are identical to sequential
//! runs. Any callable may call [`abort_run`] to cooperatively cancel; the
//! run fails with an *aborted* error whose salvage carries the partial
//! solution and the executed map. The flag stays set until [`reset_abort`].

pub mod config;
pub mod dep;
pub mod error;
pub mod network;
pub mod op;
pub mod pipeline;
pub mod planner;
pub mod pool;
pub mod runner;
pub mod solution;
pub mod testing;

pub use config::{abort_run, aborted, evictions_skipped, reset_abort, set_evictions_skipped};
pub use dep::{DataName, Dep, optional, optional_kw, sfxed, sideffect, vararg, varargs};
pub use error::{ErrorKind, FlowError, Salvage};
pub use network::{DataId, EdgeFlags, Network, OpId};
pub use op::{Bindings, OpFn, OpOutput, Operation, OperationBuilder, operation};
pub use pipeline::{ComposeBuilder, Member, Pipeline, compose};
pub use planner::{Plan, Step, compile};
pub use pool::{PoolTask, RayonPool, WorkerPool};
pub use runner::{ExecMode, OverwritesCollector, Runner};
pub use solution::{Inputs, Solution};

pub use serde_json::Value;
