//! The user-facing façade: composition, narrowing, plan caching.
//!
//! A [`Pipeline`] owns a flattened set of operations, the [`Network`] built
//! from them, and the execution knobs (method, pool, overwrites collector).
//! It is cheaply cloneable; clones share state. Composition flattens nested
//! pipelines, with duplicate operation names collapsing to the last
//! occurrence; shallow merges keep each nested pipeline's name and
//! operation set as a *subgraph* annotation for rendering.
//!
//! The most recent plan is cached keyed on the request's input and output
//! name-sets and exposed through [`Pipeline::last_plan`].

use crate::dep::{DataName, Dep, optional};
use crate::error::{ErrorKind, FlowError};
use crate::network::Network;
use crate::op::Operation;
use crate::planner::{self, Plan};
use crate::pool::{RayonPool, WorkerPool};
use crate::runner::{ExecMode, OverwritesCollector, Runner};
use crate::solution::{Inputs, Solution};
use log::debug;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Something composable: a bare operation or a whole pipeline.
pub enum Member {
    Operation(Operation),
    Pipeline(Pipeline),
}

impl From<Operation> for Member {
    fn from(op: Operation) -> Self {
        Member::Operation(op)
    }
}

impl From<&Operation> for Member {
    fn from(op: &Operation) -> Self {
        Member::Operation(op.clone())
    }
}

impl From<Pipeline> for Member {
    fn from(p: Pipeline) -> Self {
        Member::Pipeline(p)
    }
}

impl From<&Pipeline> for Member {
    fn from(p: &Pipeline) -> Self {
        Member::Pipeline(p.clone())
    }
}

/// Start composing a pipeline.
pub fn compose(name: impl Into<String>) -> ComposeBuilder {
    ComposeBuilder {
        name: name.into(),
        members: Vec::new(),
        merge: false,
        needs: None,
        provides: None,
    }
}

/// Builder returned by [`compose`].
pub struct ComposeBuilder {
    name: String,
    members: Vec<Member>,
    merge: bool,
    needs: Option<Vec<Dep>>,
    provides: Option<Vec<DataName>>,
}

impl ComposeBuilder {
    /// Append an operation or a nested pipeline.
    #[must_use]
    pub fn member(mut self, m: impl Into<Member>) -> Self {
        self.members.push(m.into());
        self
    }

    /// Deep-merge: flatten everything and drop nested-pipeline identity.
    /// Without it, nested pipelines are remembered as subgraphs.
    #[must_use]
    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    /// Narrow the surface inputs; everything else becomes internal-only.
    #[must_use]
    pub fn needs<I, D>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dep>,
    {
        self.needs = Some(needs.into_iter().map(Into::into).collect());
        self
    }

    /// Narrow the surface outputs.
    #[must_use]
    pub fn provides<I, D>(mut self, provides: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DataName>,
    {
        self.provides = Some(provides.into_iter().map(Into::into).collect());
        self
    }

    /// Flatten, dedupe, optionally narrow, and build the pipeline.
    ///
    /// # Errors
    ///
    /// *validation* for malformed operation sets (cycles), and
    /// *impossible-provides* when narrowing requests an unreachable output.
    pub fn build(self) -> Result<Pipeline, FlowError> {
        let mut flat: Vec<(Operation, Option<String>)> = Vec::new();
        for member in self.members {
            match member {
                Member::Operation(op) => flat.push((op, None)),
                Member::Pipeline(p) => {
                    let pname = p.name();
                    for op in p.operations() {
                        flat.push((op, Some(pname.clone())));
                    }
                }
            }
        }

        // Duplicate names collapse to the last occurrence, at its position.
        let mut seen: HashSet<String> = HashSet::new();
        let mut deduped: Vec<(Operation, Option<String>)> = Vec::new();
        for item in flat.into_iter().rev() {
            if seen.insert(item.0.name().to_string()) {
                deduped.push(item);
            }
        }
        deduped.reverse();

        let narrowed = narrow_ops(
            deduped,
            self.needs.as_deref(),
            self.provides.as_deref(),
        )?;

        let subgraphs = if self.merge {
            Vec::new()
        } else {
            let mut groups: Vec<(String, Vec<String>)> = Vec::new();
            for (op, provenance) in &narrowed {
                if let Some(pname) = provenance {
                    match groups.iter_mut().find(|(g, _)| g == pname) {
                        Some((_, names)) => names.push(op.name().to_string()),
                        None => groups.push((pname.clone(), vec![op.name().to_string()])),
                    }
                }
            }
            groups
        };

        let ops: Vec<Operation> = narrowed.into_iter().map(|(op, _)| op).collect();
        let net = Arc::new(Network::new(ops.clone())?);
        let (needs, provides) =
            surface(&ops, self.needs.as_deref(), self.provides.as_deref());

        debug!(
            "composed pipeline '{}': {} operations, needs {:?}, provides {:?}",
            self.name,
            ops.len(),
            needs,
            provides
        );

        Ok(Pipeline {
            inner: Arc::new(Mutex::new(PipelineInner {
                name: self.name,
                ops,
                subgraphs,
                net,
                needs,
                provides,
                mode: ExecMode::Sequential,
                pool: Arc::new(RayonPool::new()),
                collector: None,
                last_plan: None,
                cache_key: None,
            })),
        })
    }
}

/// Prune an operation set down to what the narrowed surface can satisfy
/// and what the narrowed outputs make useful.
fn narrow_ops(
    ops: Vec<(Operation, Option<String>)>,
    needs: Option<&[Dep]>,
    provides: Option<&[DataName]>,
) -> Result<Vec<(Operation, Option<String>)>, FlowError> {
    if needs.is_none() && provides.is_none() {
        return Ok(ops);
    }
    let bare: Vec<Operation> = ops.iter().map(|(op, _)| op.clone()).collect();
    let net = Network::new(bare)?;

    let inputs: BTreeSet<DataName> = match needs {
        Some(deps) => deps.iter().map(|d| d.name().clone()).collect(),
        None => root_needs(&ops),
    };
    let outs: Option<BTreeSet<DataName>> =
        provides.map(|names| names.iter().cloned().collect());

    let pr = planner::prune(&net, &inputs, outs.as_ref(), false)?;
    let kept_names: HashSet<&str> = pr
        .kept
        .iter()
        .map(|&id| net.op(id).name())
        .collect();

    if let Some(want) = provides {
        let reachable: BTreeSet<&DataName> = ops
            .iter()
            .filter(|(op, _)| kept_names.contains(op.name()))
            .flat_map(|(op, _)| op.provide_names().iter())
            .collect();
        let missing: Vec<DataName> = want
            .iter()
            .filter(|n| !reachable.contains(n))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(FlowError::new(ErrorKind::ImpossibleProvides(missing)));
        }
    }

    Ok(ops
        .into_iter()
        .filter(|(op, _)| kept_names.contains(op.name()))
        .collect())
}

/// Need names consumed by the set and provided by none of it.
fn root_needs(ops: &[(Operation, Option<String>)]) -> BTreeSet<DataName> {
    let provided: BTreeSet<&DataName> = ops
        .iter()
        .flat_map(|(op, _)| op.provide_names().iter())
        .collect();
    ops.iter()
        .flat_map(|(op, _)| op.need_specs().iter())
        .map(|s| &s.name)
        .filter(|n| !provided.contains(n))
        .cloned()
        .collect()
}

/// Recompute the composed surface. A need is optional iff no operation
/// requires it; internal names (provided by a member) are not surfaced.
fn surface(
    ops: &[Operation],
    needs_override: Option<&[Dep]>,
    provides_override: Option<&[DataName]>,
) -> (Vec<Dep>, Vec<DataName>) {
    let provided: BTreeSet<&DataName> = ops
        .iter()
        .flat_map(|op| op.provide_names().iter())
        .collect();
    let required_by_some = |name: &DataName| {
        ops.iter().any(|op| {
            op.need_specs()
                .iter()
                .any(|s| &s.name == name && !s.is_optional())
        })
    };
    let surface_dep = |name: &DataName| -> Dep {
        if name.is_sideffect() || required_by_some(name) {
            Dep::from(name.clone())
        } else {
            optional(name.as_str())
        }
    };

    let needs: Vec<Dep> = match needs_override {
        Some(list) => list.iter().map(|d| surface_dep(d.name())).collect(),
        None => {
            let mut out: Vec<Dep> = Vec::new();
            let mut seen: BTreeSet<DataName> = BTreeSet::new();
            for op in ops {
                for spec in op.need_specs() {
                    if provided.contains(&spec.name) || !seen.insert(spec.name.clone()) {
                        continue;
                    }
                    out.push(surface_dep(&spec.name));
                }
            }
            out
        }
    };

    let provides: Vec<DataName> = match provides_override {
        Some(list) => list.to_vec(),
        None => {
            let mut out: Vec<DataName> = Vec::new();
            let mut seen: BTreeSet<DataName> = BTreeSet::new();
            for op in ops {
                for name in op.provide_names() {
                    if seen.insert(name.clone()) {
                        out.push(name.clone());
                    }
                }
            }
            out
        }
    };

    (needs, provides)
}

struct PipelineInner {
    name: String,
    ops: Vec<Operation>,
    subgraphs: Vec<(String, Vec<String>)>,
    net: Arc<Network>,
    needs: Vec<Dep>,
    provides: Vec<DataName>,
    mode: ExecMode,
    pool: Arc<dyn WorkerPool>,
    collector: Option<OverwritesCollector>,
    last_plan: Option<Arc<Plan>>,
    cache_key: Option<(BTreeSet<DataName>, Option<BTreeSet<DataName>>)>,
}

/// A composed computation graph with execution state. Built by [`compose`].
pub struct Pipeline {
    inner: Arc<Mutex<PipelineInner>>,
}

impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Pipeline {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Pipeline {
    /// The pipeline's name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.lock().unwrap().name.clone()
    }

    /// The flattened operations, in planning order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.inner.lock().unwrap().ops.clone()
    }

    /// The surface needs, optionality recomputed from the members.
    #[must_use]
    pub fn needs(&self) -> Vec<Dep> {
        self.inner.lock().unwrap().needs.clone()
    }

    /// The surface provides.
    #[must_use]
    pub fn provides(&self) -> Vec<DataName> {
        self.inner.lock().unwrap().provides.clone()
    }

    /// Nested pipelines absorbed by a shallow merge:
    /// `(pipeline name, its operation names)`.
    #[must_use]
    pub fn subgraphs(&self) -> Vec<(String, Vec<String>)> {
        self.inner.lock().unwrap().subgraphs.clone()
    }

    /// The plan compiled by the most recent compute, for inspection.
    #[must_use]
    pub fn last_plan(&self) -> Option<Arc<Plan>> {
        self.inner.lock().unwrap().last_plan.clone()
    }

    /// Choose sequential or parallel dispatch for subsequent computes.
    pub fn set_execution_method(&self, mode: ExecMode) {
        self.inner.lock().unwrap().mode = mode;
    }

    /// Replace the worker pool used by parallel dispatch.
    pub fn set_worker_pool(&self, pool: Arc<dyn WorkerPool>) {
        self.inner.lock().unwrap().pool = pool;
    }

    /// Install (or remove) the mapping that receives values displaced from
    /// user-supplied slots.
    pub fn set_overwrites_collector(&self, collector: Option<OverwritesCollector>) {
        self.inner.lock().unwrap().collector = collector;
    }

    /// Compute with the full solution returned.
    ///
    /// # Errors
    ///
    /// As [`Pipeline::compute`].
    pub fn run(&self, inputs: &Inputs) -> Result<Solution, FlowError> {
        self.compute(inputs, None)
    }

    /// Plan (or reuse the cached plan) and execute.
    ///
    /// With `outputs`, the returned solution is filtered to exactly those
    /// names and memory-bounding evictions are planned; without, the full
    /// solution is returned.
    ///
    /// # Errors
    ///
    /// Planning errors (*unknown-output*) before any callable runs;
    /// execution errors (*operation-failed*, result-shape kinds,
    /// *aborted*) with salvage attached.
    pub fn compute(
        &self,
        inputs: &Inputs,
        outputs: Option<&[DataName]>,
    ) -> Result<Solution, FlowError> {
        self.compute_with(inputs, outputs, false)
    }

    /// [`Pipeline::compute`] with an explicit cache override: `recompile`
    /// forces fresh planning even on a cache hit.
    ///
    /// # Errors
    ///
    /// As [`Pipeline::compute`].
    pub fn compute_with(
        &self,
        inputs: &Inputs,
        outputs: Option<&[DataName]>,
        recompile: bool,
    ) -> Result<Solution, FlowError> {
        let input_names: BTreeSet<DataName> = inputs.keys().cloned().collect();
        let output_names: Option<BTreeSet<DataName>> =
            outputs.map(|o| o.iter().cloned().collect());
        let key = (input_names.clone(), output_names.clone());

        let (plan, mode, pool, collector) = {
            let mut g = self.inner.lock().unwrap();
            let hit = !recompile
                && g.last_plan.is_some()
                && g.cache_key.as_ref() == Some(&key);
            let plan = if hit {
                debug!("pipeline '{}': plan cache hit", g.name);
                Arc::clone(g.last_plan.as_ref().unwrap())
            } else {
                let compiled =
                    Arc::new(planner::compile(&g.net, &input_names, output_names.as_ref())?);
                g.last_plan = Some(Arc::clone(&compiled));
                g.cache_key = Some(key);
                compiled
            };
            (plan, g.mode, Arc::clone(&g.pool), g.collector.clone())
        };

        let runner = Runner { mode, pool };
        runner.run(&plan, inputs, collector.as_ref())
    }

    /// A new pipeline restricted to the given surface inputs and outputs.
    /// `None` keeps the respective side as-is.
    ///
    /// # Errors
    ///
    /// *impossible-provides* when a requested output is unreachable from
    /// the narrowed inputs.
    pub fn narrow(
        &self,
        inputs: Option<&[Dep]>,
        outputs: Option<&[DataName]>,
    ) -> Result<Pipeline, FlowError> {
        let (name, ops, mode, pool) = {
            let g = self.inner.lock().unwrap();
            (g.name.clone(), g.ops.clone(), g.mode, Arc::clone(&g.pool))
        };
        let mut builder = compose(name).merge(true);
        for op in ops {
            builder = builder.member(op);
        }
        if let Some(needs) = inputs {
            builder = builder.needs(needs.iter().cloned());
        }
        if let Some(provides) = outputs {
            builder = builder.provides(provides.iter().cloned());
        }
        let narrowed = builder.build()?;
        narrowed.set_execution_method(mode);
        narrowed.set_worker_pool(pool);
        Ok(narrowed)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.inner.lock().unwrap();
        write!(
            f,
            "Pipeline(name='{}', needs={:?}, provides={:?})",
            g.name, g.needs, g.provides
        )
    }
}
