//! Planning: pruning, deterministic ordering, eviction and pin insertion.
//!
//! The planner turns a [`Network`] plus the caller's available inputs and
//! requested outputs into an executable [`Plan`]: a linear sequence of
//! [`Step`]s the runner interprets. Planning applies, in order:
//!
//! 1. **Output validation** -- requested names must be graph nodes
//!    (side-effect outputs must additionally be provided by something).
//! 2. **Satisfiability** -- forward fixpoint; an operation survives only
//!    when every non-optional need is an input or reachable from one.
//! 3. **Same-provide designation** -- when several satisfiable operations
//!    provide one data name, the first in insertion order keeps the edge;
//!    later edges are *broken* and never written at runtime.
//! 4. **Usefulness** -- backward pass; an operation survives only when some
//!    unbroken provide is neither already supplied by the caller nor
//!    useless for the requested outputs.
//! 5. **Topological ordering** with a smallest-index tie-break, so
//!    equivalent graphs always plan identically.
//! 6. **Eviction/pin insertion** -- memory-bounding `Evict`s (only when
//!    outputs were requested and evictions are not globally skipped) and
//!    the `Pin`/`Evict` pairs that protect user-supplied values an
//!    operation is about to overwrite.

use crate::config;
use crate::dep::DataName;
use crate::error::{ErrorKind, FlowError};
use crate::network::{DataId, Network, OpId};
use crate::op::Operation;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// One instruction of an execution plan.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Step {
    /// Invoke the operation's callable.
    Compute(OpId),
    /// Drop a value from the working solution (or, for pinned data,
    /// restore the user-supplied snapshot).
    Evict(DataId),
    /// Snapshot a user-supplied value before the next compute overwrites it.
    Pin(DataId),
}

/// An ordered, immutable execution plan. Built by [`compile`].
pub struct Plan {
    net: Arc<Network>,
    inputs: BTreeSet<DataName>,
    outputs: Option<BTreeSet<DataName>>,
    steps: Vec<Step>,
    compute_order: Vec<OpId>,
    pruned: Vec<OpId>,
    broken: BTreeSet<(OpId, DataId)>,
    preds: Vec<Vec<OpId>>,
    evictions_included: bool,
}

impl Plan {
    /// The graph this plan runs against.
    #[must_use]
    pub fn net(&self) -> &Arc<Network> {
        &self.net
    }

    /// The ordered steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The surviving operations, in execution order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.compute_order.iter().map(|&id| self.net.op(id))
    }

    /// The operations pruned away for this request.
    pub fn pruned_operations(&self) -> impl Iterator<Item = &Operation> {
        self.pruned.iter().map(|&id| self.net.op(id))
    }

    /// Provide edges broken by the same-provide tie-break:
    /// `(operation, data name it will not write)`.
    pub fn broken_provides(&self) -> impl Iterator<Item = (&Operation, &DataName)> {
        self.broken
            .iter()
            .map(|&(op, d)| (self.net.op(op), self.net.data_name(d)))
    }

    /// The input names this plan was compiled for.
    #[must_use]
    pub fn inputs(&self) -> &BTreeSet<DataName> {
        &self.inputs
    }

    /// The requested outputs, when any.
    #[must_use]
    pub fn outputs(&self) -> Option<&BTreeSet<DataName>> {
        self.outputs.as_ref()
    }

    /// Whether memory-bounding evictions were planned.
    #[must_use]
    pub fn evictions_included(&self) -> bool {
        self.evictions_included
    }

    /// Count of steps of each kind: `(computes, evicts, pins)`.
    #[must_use]
    pub fn step_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for s in &self.steps {
            match s {
                Step::Compute(_) => counts.0 += 1,
                Step::Evict(_) => counts.1 += 1,
                Step::Pin(_) => counts.2 += 1,
            }
        }
        counts
    }

    pub(crate) fn is_broken(&self, op: OpId, data: DataId) -> bool {
        self.broken.contains(&(op, data))
    }

    pub(crate) fn preds_of(&self, op: OpId) -> &[OpId] {
        &self.preds[op.raw()]
    }

    /// Whether a pinned datum survives its restoring evict: everything
    /// survives when no outputs were requested.
    pub(crate) fn keeps_after_restore(&self, name: &DataName) -> bool {
        match &self.outputs {
            None => true,
            Some(outs) => outs.contains(name),
        }
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (c, e, p) = self.step_counts();
        f.debug_struct("Plan")
            .field("computes", &c)
            .field("evicts", &e)
            .field("pins", &p)
            .field("pruned", &self.pruned.len())
            .finish()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Plan ({} steps, evictions {}):",
            self.steps.len(),
            if self.evictions_included { "on" } else { "off" }
        )?;
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                Step::Compute(op) => {
                    writeln!(f, "  {:>3}. compute '{}'", i + 1, self.net.op(*op).name())?;
                }
                Step::Evict(d) => {
                    writeln!(f, "  {:>3}. evict {:?}", i + 1, self.net.data_name(*d))?;
                }
                Step::Pin(d) => {
                    writeln!(f, "  {:>3}. pin {:?}", i + 1, self.net.data_name(*d))?;
                }
            }
        }
        if !self.pruned.is_empty() {
            let names: Vec<&str> = self
                .pruned
                .iter()
                .map(|&id| self.net.op(id).name())
                .collect();
            writeln!(f, "  pruned: {names:?}")?;
        }
        if !self.broken.is_empty() {
            let pairs: Vec<String> = self
                .broken
                .iter()
                .map(|&(op, d)| {
                    format!("'{}' -x-> {:?}", self.net.op(op).name(), self.net.data_name(d))
                })
                .collect();
            writeln!(f, "  broken provides: {pairs:?}")?;
        }
        Ok(())
    }
}

/// The pruning result, shared between plan compilation and pipeline
/// narrowing.
pub(crate) struct Pruned {
    pub kept: Vec<OpId>,
    pub pruned: Vec<OpId>,
    pub broken: BTreeSet<(OpId, DataId)>,
    pub designated: HashMap<DataId, OpId>,
}

/// Prune the graph for a request. With `validate_outputs`, unknown
/// requested names fail *unknown-output*; narrowing passes `false` and
/// judges reachability itself.
pub(crate) fn prune(
    net: &Network,
    inputs: &BTreeSet<DataName>,
    outputs: Option<&BTreeSet<DataName>>,
    validate_outputs: bool,
) -> Result<Pruned, FlowError> {
    if validate_outputs {
        if let Some(outs) = outputs {
            for name in outs {
                let known = match net.data_id(name) {
                    None => false,
                    // A side-effect can only be asked of a graph that
                    // asserts it; merely consuming one does not count.
                    Some(did) => !name.is_sideffect() || !net.producers_of(did).is_empty(),
                };
                if !known {
                    return Err(FlowError::new(ErrorKind::UnknownOutput(name.clone())));
                }
            }
        }
    }

    let nops = net.op_count();
    let input_ids: HashSet<DataId> = inputs.iter().filter_map(|n| net.data_id(n)).collect();
    let out_ids: Option<HashSet<DataId>> =
        outputs.map(|outs| outs.iter().filter_map(|n| net.data_id(n)).collect());

    // Forward satisfiability fixpoint.
    let mut avail = vec![false; net.data_count()];
    for d in &input_ids {
        avail[d.raw()] = true;
    }
    let mut sat = vec![false; nops];
    loop {
        let mut changed = false;
        for i in 0..nops {
            if sat[i] {
                continue;
            }
            let ready = net
                .needs_of(OpId(i))
                .iter()
                .all(|&(d, f)| f.optional || avail[d.raw()]);
            if ready {
                sat[i] = true;
                changed = true;
                for &(d, _) in net.provides_of(OpId(i)) {
                    avail[d.raw()] = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    // Same-provide designation, insertion order wins. Side-effect tokens
    // are assertions, not values; every provider keeps those edges.
    let mut designated: HashMap<DataId, OpId> = HashMap::new();
    let mut broken: BTreeSet<(OpId, DataId)> = BTreeSet::new();
    for i in 0..nops {
        if !sat[i] {
            continue;
        }
        for &(d, f) in net.provides_of(OpId(i)) {
            if f.sideffect {
                continue;
            }
            match designated.get(&d) {
                Some(_) => {
                    broken.insert((OpId(i), d));
                }
                None => {
                    designated.insert(d, OpId(i));
                }
            }
        }
    }

    // Backward usefulness fixpoint. A provide contributes nothing when the
    // caller already supplied that value; an operation left with no
    // contributing provide is dropped, possibly cascading upstream.
    let mut kept = sat;
    loop {
        let mut changed = false;
        for i in (0..nops).rev() {
            if !kept[i] {
                continue;
            }
            let useful = net.provides_of(OpId(i)).iter().any(|&(d, f)| {
                if !f.sideffect && broken.contains(&(OpId(i), d)) {
                    return false;
                }
                if input_ids.contains(&d) {
                    return false;
                }
                match &out_ids {
                    None => true,
                    Some(outs) => {
                        outs.contains(&d)
                            || net.consumers_of(d).iter().any(|c| kept[c.raw()])
                    }
                }
            });
            if !useful {
                kept[i] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let kept_ids: Vec<OpId> = (0..nops).filter(|&i| kept[i]).map(OpId).collect();
    let pruned_ids: Vec<OpId> = (0..nops).filter(|&i| !kept[i]).map(OpId).collect();
    broken.retain(|&(op, _)| kept[op.raw()]);
    designated.retain(|_, op| kept[op.raw()]);

    Ok(Pruned {
        kept: kept_ids,
        pruned: pruned_ids,
        broken,
        designated,
    })
}

/// Compile an execution plan for a request.
///
/// # Errors
///
/// *unknown-output* for requested names the graph cannot answer for.
pub fn compile(
    net: &Arc<Network>,
    inputs: &BTreeSet<DataName>,
    outputs: Option<&BTreeSet<DataName>>,
) -> Result<Plan, FlowError> {
    let pr = prune(net, inputs, outputs, true)?;
    let input_ids: HashSet<DataId> = inputs.iter().filter_map(|n| net.data_id(n)).collect();
    let out_ids: Option<HashSet<DataId>> =
        outputs.map(|outs| outs.iter().filter_map(|n| net.data_id(n)).collect());
    let kept: HashSet<OpId> = pr.kept.iter().copied().collect();

    // Kahn's algorithm; ties go to the lowest operation index, so
    // equivalent graphs always linearise identically.
    let mut preds: Vec<BTreeSet<OpId>> = vec![BTreeSet::new(); net.op_count()];
    let mut succs: Vec<BTreeSet<OpId>> = vec![BTreeSet::new(); net.op_count()];
    for d in 0..net.data_count() {
        let did = DataId(d);
        let producers: Vec<OpId> = if net.data_name(did).is_sideffect() {
            net.producers_of(did)
                .iter()
                .copied()
                .filter(|p| kept.contains(p))
                .collect()
        } else {
            pr.designated.get(&did).copied().into_iter().collect()
        };
        for &p in &producers {
            for &c in net.consumers_of(did) {
                if kept.contains(&c) && c != p {
                    succs[p.raw()].insert(c);
                    preds[c.raw()].insert(p);
                }
            }
        }
    }

    let mut indeg: HashMap<OpId, usize> = pr
        .kept
        .iter()
        .map(|&op| (op, preds[op.raw()].len()))
        .collect();
    let mut frontier: BTreeSet<OpId> = indeg
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(&op, _)| op)
        .collect();
    let mut order: Vec<OpId> = Vec::with_capacity(pr.kept.len());
    while let Some(op) = frontier.pop_first() {
        order.push(op);
        for &s in &succs[op.raw()] {
            if let Some(n) = indeg.get_mut(&s) {
                *n -= 1;
                if *n == 0 {
                    frontier.insert(s);
                }
            }
        }
    }
    if order.len() != pr.kept.len() {
        return Err(FlowError::validation(
            "planning could not order the surviving operations",
        ));
    }

    // Pins protect user-supplied values a surviving operation overwrites.
    let pinned: BTreeSet<DataId> = pr
        .designated
        .keys()
        .copied()
        .filter(|d| input_ids.contains(d))
        .collect();

    // A datum's last use is the latest compute that reads or writes it.
    let pos_of: HashMap<OpId, usize> = order.iter().enumerate().map(|(i, &op)| (op, i)).collect();
    let mut last_use: BTreeMap<DataId, usize> = BTreeMap::new();
    for (&op, &pos) in &pos_of {
        for &(d, _) in net.needs_of(op) {
            let e = last_use.entry(d).or_insert(pos);
            *e = (*e).max(pos);
        }
        for &(d, f) in net.provides_of(op) {
            if f.sideffect || pr.designated.get(&d) != Some(&op) {
                continue;
            }
            let e = last_use.entry(d).or_insert(pos);
            *e = (*e).max(pos);
        }
    }

    let evictions_included = outputs.is_some() && !config::evictions_skipped();
    let mut evict_after: Vec<Vec<DataId>> = vec![Vec::new(); order.len().max(1)];
    for (&d, &pos) in &last_use {
        if net.data_name(d).is_sideffect() {
            continue;
        }
        if pinned.contains(&d) {
            // The restoring evict is part of pin semantics, planned even
            // when memory-bounding evictions are off.
            evict_after[pos].push(d);
        } else if evictions_included {
            let requested = out_ids.as_ref().is_some_and(|o| o.contains(&d));
            if !requested {
                evict_after[pos].push(d);
            }
        }
    }

    let mut steps: Vec<Step> = Vec::new();
    for (pos, &op) in order.iter().enumerate() {
        let mut pins: Vec<DataId> = pinned
            .iter()
            .copied()
            .filter(|d| pr.designated.get(d) == Some(&op))
            .collect();
        pins.sort_unstable();
        for d in pins {
            steps.push(Step::Pin(d));
        }
        steps.push(Step::Compute(op));
        for &d in &evict_after[pos] {
            steps.push(Step::Evict(d));
        }
    }

    debug!(
        "compiled plan: {} computes, {} pruned, {} broken provides, evictions {}",
        order.len(),
        pr.pruned.len(),
        pr.broken.len(),
        if evictions_included { "on" } else { "off" }
    );

    Ok(Plan {
        net: Arc::clone(net),
        inputs: inputs.clone(),
        outputs: outputs.cloned(),
        steps,
        compute_order: order,
        pruned: pr.pruned,
        broken: pr.broken,
        preds: preds.into_iter().map(|s| s.into_iter().collect()).collect(),
        evictions_included,
    })
}
