//! The bipartite computation graph: data nodes and operation nodes.
//!
//! A [`Network`] is built once from a sequence of [`Operation`]s and never
//! mutated afterwards. Operations and data names live in arenas owned by
//! the graph; edges are index pairs carrying the [`EdgeFlags`] the planner
//! consults. Operations hold no back-reference to the graph.

use crate::dep::DataName;
use crate::error::FlowError;
use crate::op::Operation;
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Index of an operation node in its [`Network`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub(crate) usize);

impl OpId {
    /// The underlying index.
    #[must_use]
    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpId({})", self.0)
    }
}

/// Index of a data node in its [`Network`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(pub(crate) usize);

impl DataId {
    /// The underlying index.
    #[must_use]
    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataId({})", self.0)
    }
}

/// Planner-relevant annotations on a need or provide edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct EdgeFlags {
    /// The edge does not block satisfiability (optional/vararg needs).
    pub optional: bool,
    /// The edge touches a side-effect token.
    pub sideffect: bool,
}

/// Immutable bipartite graph over data names and operations.
pub struct Network {
    ops: Vec<Operation>,
    data: Vec<DataName>,
    index: HashMap<DataName, DataId>,
    op_needs: Vec<Vec<(DataId, EdgeFlags)>>,
    op_provides: Vec<Vec<(DataId, EdgeFlags)>>,
    consumers: Vec<Vec<OpId>>,
    producers: Vec<Vec<OpId>>,
}

impl Network {
    /// Build the graph from operations in user insertion order.
    ///
    /// # Errors
    ///
    /// *validation* when two operations share a name or the resulting
    /// graph is cyclic.
    pub fn new(ops: Vec<Operation>) -> Result<Self, FlowError> {
        let mut names = BTreeSet::new();
        for op in &ops {
            if !names.insert(op.name().to_string()) {
                return Err(FlowError::validation(format!(
                    "duplicate operation name '{}'",
                    op.name()
                )));
            }
        }

        let mut net = Network {
            op_needs: vec![Vec::new(); ops.len()],
            op_provides: vec![Vec::new(); ops.len()],
            ops,
            data: Vec::new(),
            index: HashMap::new(),
            consumers: Vec::new(),
            producers: Vec::new(),
        };

        for i in 0..net.ops.len() {
            let oid = OpId(i);
            let op = net.ops[i].clone();
            for spec in op.need_specs() {
                let did = net.intern(spec.name.clone());
                let flags = EdgeFlags {
                    optional: spec.is_optional(),
                    sideffect: spec.name.is_sideffect(),
                };
                net.op_needs[i].push((did, flags));
                net.consumers[did.0].push(oid);
            }
            for name in op.provide_names() {
                let did = net.intern(name.clone());
                let flags = EdgeFlags {
                    optional: false,
                    sideffect: name.is_sideffect(),
                };
                net.op_provides[i].push((did, flags));
                net.producers[did.0].push(oid);
            }
        }

        net.check_acyclic()?;
        debug!(
            "network built: {} operations, {} data nodes",
            net.ops.len(),
            net.data.len()
        );
        Ok(net)
    }

    fn intern(&mut self, name: DataName) -> DataId {
        if let Some(&id) = self.index.get(&name) {
            return id;
        }
        let id = DataId(self.data.len());
        self.data.push(name.clone());
        self.index.insert(name, id);
        self.consumers.push(Vec::new());
        self.producers.push(Vec::new());
        id
    }

    /// Kahn's algorithm over operation nodes; provides feed consumers.
    fn check_acyclic(&self) -> Result<(), FlowError> {
        let n = self.ops.len();
        let mut indeg = vec![0usize; n];
        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, provides) in self.op_provides.iter().enumerate() {
            for (did, _) in provides {
                for c in &self.consumers[did.0] {
                    succs[i].push(c.0);
                    indeg[c.0] += 1;
                }
            }
        }
        let mut frontier: Vec<usize> = (0..n).filter(|&i| indeg[i] == 0).collect();
        let mut seen = 0;
        while let Some(i) = frontier.pop() {
            seen += 1;
            for &s in &succs[i] {
                indeg[s] -= 1;
                if indeg[s] == 0 {
                    frontier.push(s);
                }
            }
        }
        if seen != n {
            let stuck: Vec<&str> = (0..n)
                .filter(|&i| indeg[i] > 0)
                .map(|i| self.ops[i].name())
                .collect();
            return Err(FlowError::validation(format!(
                "graph contains a cycle through operations {stuck:?}"
            )));
        }
        Ok(())
    }

    /// Number of operation nodes.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Operations in insertion order.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Operation)> {
        self.ops.iter().enumerate().map(|(i, op)| (OpId(i), op))
    }

    /// The operation behind an id.
    #[must_use]
    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.0]
    }

    /// Number of data nodes.
    #[must_use]
    pub fn data_count(&self) -> usize {
        self.data.len()
    }

    /// The data name behind an id.
    #[must_use]
    pub fn data_name(&self, id: DataId) -> &DataName {
        &self.data[id.0]
    }

    /// Look a data name up, if it is a node of this graph.
    #[must_use]
    pub fn data_id(&self, name: &DataName) -> Option<DataId> {
        self.index.get(name).copied()
    }

    /// Need edges of an operation, in declaration order.
    #[must_use]
    pub fn needs_of(&self, op: OpId) -> &[(DataId, EdgeFlags)] {
        &self.op_needs[op.0]
    }

    /// Provide edges of an operation, in declaration order.
    #[must_use]
    pub fn provides_of(&self, op: OpId) -> &[(DataId, EdgeFlags)] {
        &self.op_provides[op.0]
    }

    /// Operations consuming a data node, in insertion order.
    #[must_use]
    pub fn consumers_of(&self, data: DataId) -> &[OpId] {
        &self.consumers[data.0]
    }

    /// Operations providing a data node, in insertion order.
    #[must_use]
    pub fn producers_of(&self, data: DataId) -> &[OpId] {
        &self.producers[data.0]
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("ops", &self.ops.len())
            .field("data", &self.data.len())
            .finish()
    }
}
