//! Plan execution, sequential and parallel.
//!
//! Both modes interpret the same [`Plan`] with the same step semantics:
//!
//! - **Compute**: gather the operation's arguments from the working
//!   solution (preferring pin snapshots, so user-supplied values survive
//!   overwriting producers), invoke the callable, write its unbroken real
//!   provides.
//! - **Pin**: snapshot the current value of a user-supplied datum the next
//!   compute would overwrite.
//! - **Evict**: for pinned data, move the displaced computed value to the
//!   overwrites record and restore the snapshot (or drop the datum when it
//!   is not wanted anymore); otherwise just drop the datum.
//!
//! Parallel mode dispatches each frontier of independent computes to the
//! [`WorkerPool`]; pins and evicts act as barriers on the interpreting
//! thread. For a fixed request both modes execute the same operations and
//! return the same mapping.
//!
//! The abort flag is checked before every dispatch; once observed the run
//! fails with *aborted*, salvaging the partial solution and the map of
//! which operations had run.

use crate::config;
use crate::dep::DataName;
use crate::error::{ErrorKind, FlowError};
use crate::network::{DataId, OpId};
use crate::op::{self, Bindings, NeedKind};
use crate::planner::{Plan, Step};
use crate::pool::{PoolTask, RayonPool, WorkerPool};
use crate::solution::{Inputs, Solution};
use log::trace;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

/// How a plan's computes are dispatched.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ExecMode {
    /// Single-threaded, in plan order.
    #[default]
    Sequential,
    /// Independent computes of a frontier run concurrently.
    Parallel,
}

/// The mapping that receives values displaced from user-supplied slots.
pub type OverwritesCollector = Arc<Mutex<BTreeMap<String, Value>>>;

/// Executes plans. The pool is only consulted in parallel mode.
pub struct Runner {
    pub mode: ExecMode,
    pub pool: Arc<dyn WorkerPool>,
}

impl Default for Runner {
    fn default() -> Self {
        Runner {
            mode: ExecMode::Sequential,
            pool: Arc::new(RayonPool::new()),
        }
    }
}

impl Runner {
    /// Run a plan against named inputs.
    ///
    /// # Errors
    ///
    /// *operation-failed*, *iterable-result-arity*, *dict-result-mismatch*,
    /// *aborted*, or a *multiple-failures* composite from a parallel
    /// frontier; all carry salvage.
    pub fn run(
        &self,
        plan: &Arc<Plan>,
        inputs: &Inputs,
        collector: Option<&OverwritesCollector>,
    ) -> Result<Solution, FlowError> {
        let mut ctx = ExecCtx {
            plan,
            sol: Solution::seeded(inputs),
            pins: BTreeMap::new(),
            pin_overwritten: BTreeSet::new(),
            collector,
        };
        for op in plan.operations() {
            ctx.sol.mark_planned(op.name());
        }
        match self.mode {
            ExecMode::Sequential => self.run_sequential(&mut ctx)?,
            ExecMode::Parallel => self.run_parallel(&mut ctx)?,
        }
        if let Some(outs) = plan.outputs() {
            ctx.sol.retain_outputs(outs);
        }
        Ok(ctx.sol)
    }

    fn run_sequential(&self, ctx: &mut ExecCtx<'_>) -> Result<(), FlowError> {
        for step in ctx.plan.steps() {
            match *step {
                Step::Pin(d) => ctx.pin(d),
                Step::Evict(d) => ctx.evict(d),
                Step::Compute(op) => {
                    if config::aborted() {
                        return Err(ctx.fail(FlowError::new(ErrorKind::Aborted)));
                    }
                    let name = ctx.plan.net().op(op).name().to_string();
                    let bindings = match ctx.bind(op) {
                        Ok(b) => b,
                        Err(e) => return Err(ctx.fail(e)),
                    };
                    trace!("compute '{name}'");
                    let result = (ctx.plan.net().op(op).func())(&bindings);
                    ctx.sol.mark_executed(&name);
                    match result {
                        Ok(out) => {
                            if let Err(e) = ctx.apply(op, out) {
                                return Err(ctx.fail(e));
                            }
                        }
                        Err(source) => {
                            let err = FlowError::new(ErrorKind::OperationFailed {
                                operation: name.clone(),
                                source,
                            })
                            .with_operation(name)
                            .with_bindings(bindings.to_json());
                            return Err(ctx.fail(err));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn run_parallel(&self, ctx: &mut ExecCtx<'_>) -> Result<(), FlowError> {
        let steps: Vec<Step> = ctx.plan.steps().to_vec();
        let mut done: HashSet<OpId> = HashSet::new();
        let mut i = 0;
        while i < steps.len() {
            match steps[i] {
                Step::Pin(d) => {
                    ctx.pin(d);
                    i += 1;
                }
                Step::Evict(d) => {
                    ctx.evict(d);
                    i += 1;
                }
                Step::Compute(_) => {
                    let mut run_ops: Vec<OpId> = Vec::new();
                    while i < steps.len() {
                        if let Step::Compute(op) = steps[i] {
                            run_ops.push(op);
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    self.run_frontiers(ctx, run_ops, &mut done)?;
                }
            }
        }
        Ok(())
    }

    /// Execute a contiguous run of computes as frontier batches.
    fn run_frontiers(
        &self,
        ctx: &mut ExecCtx<'_>,
        mut pending: Vec<OpId>,
        done: &mut HashSet<OpId>,
    ) -> Result<(), FlowError> {
        while !pending.is_empty() {
            if config::aborted() {
                return Err(ctx.fail(FlowError::new(ErrorKind::Aborted)));
            }
            let (ready, rest): (Vec<OpId>, Vec<OpId>) = pending.into_iter().partition(|&op| {
                ctx.plan
                    .preds_of(op)
                    .iter()
                    .all(|p| done.contains(p))
            });
            if ready.is_empty() {
                return Err(ctx.fail(FlowError::validation(
                    "parallel scheduling stalled on an unsatisfied frontier",
                )));
            }

            let mut tasks: Vec<PoolTask> = Vec::with_capacity(ready.len());
            let mut bindings_json: Vec<Value> = Vec::with_capacity(ready.len());
            for &op in &ready {
                let b = match ctx.bind(op) {
                    Ok(b) => b,
                    Err(e) => return Err(ctx.fail(e)),
                };
                bindings_json.push(b.to_json());
                let func = Arc::clone(ctx.plan.net().op(op).func());
                tasks.push(Box::new(move || func(&b)));
            }
            trace!("dispatching frontier of {}", ready.len());
            let results = self.pool.run_batch(tasks);

            let mut failures: Vec<FlowError> = Vec::new();
            for ((&op, result), bjson) in ready.iter().zip(results).zip(bindings_json) {
                let name = ctx.plan.net().op(op).name().to_string();
                ctx.sol.mark_executed(&name);
                done.insert(op);
                match result {
                    Ok(out) => {
                        if let Err(e) = ctx.apply(op, out) {
                            failures.push(e);
                        }
                    }
                    Err(source) => {
                        failures.push(
                            FlowError::new(ErrorKind::OperationFailed {
                                operation: name.clone(),
                                source,
                            })
                            .with_operation(name)
                            .with_bindings(bjson),
                        );
                    }
                }
            }
            match failures.len() {
                0 => {}
                1 => return Err(ctx.fail(failures.remove(0))),
                _ => {
                    return Err(
                        ctx.fail(FlowError::new(ErrorKind::MultipleFailures(failures)))
                    );
                }
            }
            pending = rest;
        }
        Ok(())
    }
}

struct ExecCtx<'a> {
    plan: &'a Arc<Plan>,
    sol: Solution,
    pins: BTreeMap<DataName, Value>,
    pin_overwritten: BTreeSet<DataName>,
    collector: Option<&'a OverwritesCollector>,
}

impl ExecCtx<'_> {
    /// Assemble the callable's arguments. Pin snapshots take precedence,
    /// so readers scheduled after an overwriting producer still see the
    /// user-supplied value.
    fn bind(&self, op_id: OpId) -> Result<Bindings, FlowError> {
        let op = self.plan.net().op(op_id);
        let mut b = Bindings::default();
        for spec in op.need_specs() {
            if spec.name.is_sideffect() {
                continue;
            }
            let value = self
                .pins
                .get(&spec.name)
                .or_else(|| self.sol.get_data(&spec.name));
            match spec.kind {
                NeedKind::Required => match value {
                    Some(v) => b.push_positional(v.clone()),
                    None => {
                        return Err(FlowError::new(ErrorKind::OperationFailed {
                            operation: op.name().to_string(),
                            source: anyhow::anyhow!(
                                "required input {:?} is absent (an upstream operation \
                                 produced no result)",
                                spec.name
                            ),
                        })
                        .with_operation(op.name()));
                    }
                },
                NeedKind::Optional => {
                    if let Some(v) = value {
                        let kw = spec
                            .keyword
                            .clone()
                            .unwrap_or_else(|| spec.name.as_str().to_string());
                        b.insert_keyword(kw, v.clone());
                    }
                }
                NeedKind::Vararg => {
                    if let Some(v) = value {
                        b.push_vararg(v.clone());
                    }
                }
                NeedKind::Varargs => {
                    if let Some(v) = value {
                        match v {
                            Value::Array(items) => b.extend_varargs(items.clone()),
                            other => b.push_vararg(other.clone()),
                        }
                    }
                }
            }
        }
        Ok(b)
    }

    /// Write an operation's results, skipping provide edges the planner
    /// broke, and note overwrites of pinned data.
    fn apply(&mut self, op_id: OpId, out: op::OpOutput) -> Result<(), FlowError> {
        let net = Arc::clone(self.plan.net());
        let operation = net.op(op_id);
        let pairs = op::interpret_result(operation, out)?;
        for (name, value) in pairs {
            let data = DataName::Real(name);
            let Some(did) = net.data_id(&data) else {
                continue;
            };
            if self.plan.is_broken(op_id, did) {
                continue;
            }
            if self.pins.contains_key(&data) {
                self.pin_overwritten.insert(data.clone());
            }
            self.sol.insert(data, value);
        }
        Ok(())
    }

    fn pin(&mut self, d: DataId) {
        let name = self.plan.net().data_name(d);
        if let Some(v) = self.sol.get_data(name) {
            trace!("pin {name:?}");
            self.pins.insert(name.clone(), v.clone());
        }
    }

    fn evict(&mut self, d: DataId) {
        let name = self.plan.net().data_name(d).clone();
        if let Some(snapshot) = self.pins.remove(&name) {
            if self.pin_overwritten.remove(&name) {
                if let Some(displaced) = self.sol.get_data(&name).cloned() {
                    self.sol
                        .record_overwrite(name.as_str().to_string(), displaced.clone());
                    if let Some(collector) = self.collector {
                        collector
                            .lock()
                            .unwrap()
                            .insert(name.as_str().to_string(), displaced);
                    }
                }
            }
            if self.plan.keeps_after_restore(&name) {
                trace!("restore pinned {name:?}");
                self.sol.insert(name, snapshot);
            } else {
                self.sol.remove(&name);
            }
        } else {
            trace!("evict {name:?}");
            self.sol.remove(&name);
        }
    }

    /// Attach salvage to an outgoing failure.
    fn fail(&self, err: FlowError) -> FlowError {
        err.with_solution(self.sol.as_map().clone())
            .with_executed(self.sol.executed().clone())
            .with_plan(Arc::clone(self.plan))
    }
}
