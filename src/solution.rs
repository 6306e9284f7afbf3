//! The value mapping produced by running a plan.

use crate::dep::DataName;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

/// Named inputs handed to a compute call.
pub type Inputs = BTreeMap<DataName, Value>;

/// The mapping from data names to values, seeded from the caller's inputs,
/// grown by compute steps and contracted by evictions.
///
/// Besides the values themselves a solution records which displaced values
/// went to the overwrites collector and which planned operations actually
/// executed.
#[derive(Clone, Debug, Default)]
pub struct Solution {
    values: BTreeMap<DataName, Value>,
    overwrites: BTreeMap<String, Value>,
    executed: BTreeMap<String, bool>,
}

impl Solution {
    pub(crate) fn seeded(inputs: &Inputs) -> Self {
        Solution {
            values: inputs.clone(),
            overwrites: BTreeMap::new(),
            executed: BTreeMap::new(),
        }
    }

    /// The value of a real data name, when present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&DataName::Real(name.to_string()))
    }

    /// The value behind any data name (side-effect inputs included).
    #[must_use]
    pub fn get_data(&self, name: &DataName) -> Option<&Value> {
        self.values.get(name)
    }

    /// True when the mapping holds the name.
    #[must_use]
    pub fn contains(&self, name: &DataName) -> bool {
        self.values.contains_key(name)
    }

    /// The full mapping.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<DataName, Value> {
        &self.values
    }

    /// Values displaced from user-supplied slots, keyed by data name.
    #[must_use]
    pub fn overwrites(&self) -> &BTreeMap<String, Value> {
        &self.overwrites
    }

    /// Planned operations mapped to whether they ran.
    #[must_use]
    pub fn executed(&self) -> &BTreeMap<String, bool> {
        &self.executed
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no entry is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataName, &Value)> {
        self.values.iter()
    }

    pub(crate) fn insert(&mut self, name: DataName, value: Value) -> Option<Value> {
        self.values.insert(name, value)
    }

    pub(crate) fn remove(&mut self, name: &DataName) -> Option<Value> {
        self.values.remove(name)
    }

    pub(crate) fn record_overwrite(&mut self, name: String, value: Value) {
        self.overwrites.insert(name, value);
    }

    pub(crate) fn mark_planned(&mut self, op: &str) {
        self.executed.insert(op.to_string(), false);
    }

    pub(crate) fn mark_executed(&mut self, op: &str) {
        self.executed.insert(op.to_string(), true);
    }

    /// Keep only the requested names.
    pub(crate) fn retain_outputs(&mut self, outputs: &std::collections::BTreeSet<DataName>) {
        self.values.retain(|k, _| outputs.contains(k));
    }
}

impl PartialEq<BTreeMap<DataName, Value>> for Solution {
    fn eq(&self, other: &BTreeMap<DataName, Value>) -> bool {
        &self.values == other
    }
}

impl Index<&str> for Solution {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        self.get(name)
            .unwrap_or_else(|| panic!("no '{name}' in solution"))
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k:?}: {v}")?;
        }
        write!(f, "}}")
    }
}
