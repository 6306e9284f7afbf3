//! Operation descriptors: a named callable plus its needs and provides.
//!
//! An [`Operation`] is immutable once built. Construction normalises the
//! declared [`Dep`]s into a flat edge list (expanding `sfxed` into its real
//! edge plus side-effect edges) and precomputes the *binding plan*: which
//! need lands in which slot of the [`Bindings`] handed to the callable.
//! Callables never see the solution; they see exactly the arguments their
//! declaration asked for.
//!
//! Result shapes:
//! - a single real provide takes the raw result;
//! - two or more real provides require [`OpOutput::Tuple`] (or a JSON array)
//!   of matching length;
//! - `returns_dict` operations must return [`OpOutput::Dict`] whose keys
//!   equal the real provides;
//! - [`OpOutput::NoResult`] writes nothing, for any arity.

use crate::dep::{DataName, Dep};
use crate::error::{ErrorKind, FlowError};
use crate::network::Network;
use crate::planner;
use crate::runner::Runner;
use crate::solution::{Inputs, Solution};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// How a need is handed to the callable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NeedKind {
    /// Positional, blocks satisfiability when absent.
    Required,
    /// Keyword-bound, skipped when absent.
    Optional,
    /// Appended to the vararg slot as one value, skipped when absent.
    Vararg,
    /// An array flattened into the vararg slot, skipped when absent.
    Varargs,
}

/// One normalised need edge.
#[derive(Clone, Debug)]
pub(crate) struct NeedSpec {
    pub name: DataName,
    pub kind: NeedKind,
    pub keyword: Option<String>,
}

impl NeedSpec {
    /// True when absence does not block satisfiability.
    pub fn is_optional(&self) -> bool {
        !matches!(self.kind, NeedKind::Required)
    }
}

/// The arguments passed to an operation's callable, assembled from the
/// solution according to the declared needs.
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    positional: Vec<Value>,
    keywords: BTreeMap<String, Value>,
    varargs: Vec<Value>,
}

impl Bindings {
    /// Required needs, in declaration order.
    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// The `idx`-th required need.
    ///
    /// # Panics
    ///
    /// When `idx` is out of range; operations receive exactly as many
    /// positional values as they declared required needs.
    #[must_use]
    pub fn pos(&self, idx: usize) -> &Value {
        &self.positional[idx]
    }

    /// An optional need's value, under its keyword (or name when no
    /// keyword alias was declared).
    #[must_use]
    pub fn kw(&self, keyword: &str) -> Option<&Value> {
        self.keywords.get(keyword)
    }

    /// All keyword-bound optionals present.
    #[must_use]
    pub fn keywords(&self) -> &BTreeMap<String, Value> {
        &self.keywords
    }

    /// The flattened vararg values, in encounter order.
    #[must_use]
    pub fn varargs(&self) -> &[Value] {
        &self.varargs
    }

    /// Positional values chained with varargs, for sum-of-everything
    /// style callables.
    pub fn iter_flat(&self) -> impl Iterator<Item = &Value> {
        self.positional.iter().chain(self.varargs.iter())
    }

    /// JSON rendering, used in salvage attachments.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "positional": self.positional,
            "keywords": self.keywords,
            "varargs": self.varargs,
        })
    }

    pub(crate) fn push_positional(&mut self, v: Value) {
        self.positional.push(v);
    }

    pub(crate) fn insert_keyword(&mut self, kw: String, v: Value) {
        self.keywords.insert(kw, v);
    }

    pub(crate) fn push_vararg(&mut self, v: Value) {
        self.varargs.push(v);
    }

    pub(crate) fn extend_varargs(&mut self, vs: Vec<Value>) {
        self.varargs.extend(vs);
    }
}

/// What a callable hands back to the executor.
#[derive(Clone, Debug)]
pub enum OpOutput {
    /// The raw value for a single-provide operation.
    Single(Value),
    /// One value per real provide, in declaration order.
    Tuple(Vec<Value>),
    /// Values keyed by provide name, for `returns_dict` operations.
    Dict(BTreeMap<String, Value>),
    /// Produce nothing; satisfies side-effects by virtue of having run.
    NoResult,
}

/// The callable type bound into an [`Operation`].
pub type OpFn = dyn Fn(&Bindings) -> anyhow::Result<OpOutput> + Send + Sync;

/// An immutable operation descriptor. Built via [`operation`].
#[derive(Clone)]
pub struct Operation {
    name: String,
    needs: Vec<Dep>,
    provides: Vec<Dep>,
    need_specs: Vec<NeedSpec>,
    provide_names: Vec<DataName>,
    real_provides: Vec<String>,
    func: Arc<OpFn>,
    returns_dict: bool,
}

impl Operation {
    /// The operation's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The needs as declared.
    #[must_use]
    pub fn needs(&self) -> &[Dep] {
        &self.needs
    }

    /// The provides as declared.
    #[must_use]
    pub fn provides(&self) -> &[Dep] {
        &self.provides
    }

    /// Whether the callable returns values keyed by provide name.
    #[must_use]
    pub fn returns_dict(&self) -> bool {
        self.returns_dict
    }

    pub(crate) fn need_specs(&self) -> &[NeedSpec] {
        &self.need_specs
    }

    /// Normalised provide names, side-effects included.
    pub(crate) fn provide_names(&self) -> &[DataName] {
        &self.provide_names
    }

    /// Real (stored) provide names, in declaration order.
    pub(crate) fn real_provides(&self) -> &[String] {
        &self.real_provides
    }

    pub(crate) fn func(&self) -> &Arc<OpFn> {
        &self.func
    }

    /// Run this operation on its own against a set of named inputs,
    /// without composing a pipeline first.
    ///
    /// # Errors
    ///
    /// Planning and execution failures, as for
    /// [`Pipeline::compute`](crate::Pipeline::compute).
    pub fn compute(
        &self,
        inputs: &Inputs,
        outputs: Option<&[DataName]>,
    ) -> Result<Solution, FlowError> {
        let net = Arc::new(Network::new(vec![self.clone()])?);
        let input_names: BTreeSet<DataName> = inputs.keys().cloned().collect();
        let output_names: Option<BTreeSet<DataName>> =
            outputs.map(|o| o.iter().cloned().collect());
        let plan = Arc::new(planner::compile(&net, &input_names, output_names.as_ref())?);
        Runner::default().run(&plan, inputs, None)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Operation(name='{}', needs={:?}, provides={:?})",
            self.name, self.needs, self.provides
        )
    }
}

/// Start building an operation descriptor.
pub fn operation(name: impl Into<String>) -> OperationBuilder {
    OperationBuilder {
        name: name.into(),
        needs: Vec::new(),
        provides: Vec::new(),
        returns_dict: false,
    }
}

/// Builder returned by [`operation`].
pub struct OperationBuilder {
    name: String,
    needs: Vec<Dep>,
    provides: Vec<Dep>,
    returns_dict: bool,
}

impl OperationBuilder {
    /// Declare the needs, in binding order.
    #[must_use]
    pub fn needs<I, D>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dep>,
    {
        self.needs = needs.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the provides, in result order.
    #[must_use]
    pub fn provides<I, D>(mut self, provides: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Dep>,
    {
        self.provides = provides.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the callable as returning values keyed by provide name.
    #[must_use]
    pub fn returns_dict(mut self) -> Self {
        self.returns_dict = true;
        self
    }

    /// Bind the callable and validate the declaration.
    ///
    /// # Errors
    ///
    /// *validation* when the name is empty, a need/provide name is empty,
    /// a name repeats within needs or within provides, a provide carries a
    /// needs-side modifier, or a name appears in both needs and provides.
    pub fn build<F>(self, func: F) -> Result<Operation, FlowError>
    where
        F: Fn(&Bindings) -> anyhow::Result<OpOutput> + Send + Sync + 'static,
    {
        if self.name.is_empty() {
            return Err(FlowError::validation("operation name must not be empty"));
        }

        let mut need_specs = Vec::new();
        for dep in &self.needs {
            if dep.name().as_str().is_empty() {
                return Err(FlowError::validation(format!(
                    "operation '{}': empty need name",
                    self.name
                )));
            }
            if dep.name().is_sideffect() {
                need_specs.push(NeedSpec {
                    name: dep.name().clone(),
                    kind: NeedKind::Required,
                    keyword: None,
                });
                continue;
            }
            let kind = if dep.is_vararg() {
                NeedKind::Vararg
            } else if dep.is_varargs() {
                NeedKind::Varargs
            } else if dep.is_keyword_optional() {
                NeedKind::Optional
            } else {
                NeedKind::Required
            };
            let keyword = if dep.is_keyword_optional() {
                Some(dep.keyword().to_string())
            } else {
                None
            };
            need_specs.push(NeedSpec {
                name: dep.name().clone(),
                kind,
                keyword,
            });
            for sfx in dep.sideffects() {
                need_specs.push(NeedSpec {
                    name: DataName::sfx(sfx.clone()),
                    kind: NeedKind::Required,
                    keyword: None,
                });
            }
        }

        let mut provide_names = Vec::new();
        let mut real_provides = Vec::new();
        for dep in &self.provides {
            if dep.name().as_str().is_empty() {
                return Err(FlowError::validation(format!(
                    "operation '{}': empty provide name",
                    self.name
                )));
            }
            if dep.is_optional() {
                return Err(FlowError::validation(format!(
                    "operation '{}': provide {dep} must not carry a needs-side modifier",
                    self.name
                )));
            }
            if let DataName::Real(s) = dep.name() {
                real_provides.push(s.clone());
            }
            provide_names.push(dep.name().clone());
            for sfx in dep.sideffects() {
                provide_names.push(DataName::sfx(sfx.clone()));
            }
        }

        let mut seen = BTreeSet::new();
        for spec in &need_specs {
            if !seen.insert(spec.name.clone()) {
                return Err(FlowError::validation(format!(
                    "operation '{}': duplicate need {:?}",
                    self.name, spec.name
                )));
            }
        }
        seen.clear();
        for name in &provide_names {
            if !seen.insert(name.clone()) {
                return Err(FlowError::validation(format!(
                    "operation '{}': duplicate provide {name:?}",
                    self.name
                )));
            }
        }
        if let Some(spec) = need_specs.iter().find(|s| seen.contains(&s.name)) {
            return Err(FlowError::validation(format!(
                "operation '{}': {:?} appears in both needs and provides",
                self.name, spec.name
            )));
        }

        Ok(Operation {
            name: self.name,
            needs: self.needs,
            provides: self.provides,
            need_specs,
            provide_names,
            real_provides,
            func: Arc::new(func),
            returns_dict: self.returns_dict,
        })
    }
}

fn describe(out: &OpOutput) -> String {
    match out {
        OpOutput::Single(Value::Null) => "null".to_string(),
        OpOutput::Single(Value::Bool(_)) => "a bool".to_string(),
        OpOutput::Single(Value::Number(_)) => "a number".to_string(),
        OpOutput::Single(Value::String(_)) => "a string".to_string(),
        OpOutput::Single(Value::Array(a)) => format!("an array of {}", a.len()),
        OpOutput::Single(Value::Object(o)) => format!("an object with {} keys", o.len()),
        OpOutput::Tuple(vs) => format!("a tuple of {}", vs.len()),
        OpOutput::Dict(d) => {
            let keys: Vec<&str> = d.keys().map(String::as_str).collect();
            format!("dict keys {keys:?}")
        }
        OpOutput::NoResult => "no result".to_string(),
    }
}

/// Turn a callable's raw output into `(provide, value)` pairs, enforcing
/// the declared result shape.
pub(crate) fn interpret_result(
    op: &Operation,
    out: OpOutput,
) -> Result<Vec<(String, Value)>, FlowError> {
    if matches!(out, OpOutput::NoResult) {
        return Ok(Vec::new());
    }
    let expected = op.real_provides();

    if op.returns_dict() {
        let OpOutput::Dict(map) = out else {
            return Err(FlowError::new(ErrorKind::DictResultMismatch {
                operation: op.name().to_string(),
                expected: expected.to_vec(),
                got: describe(&out),
            }));
        };
        let got_keys: BTreeSet<&str> = map.keys().map(String::as_str).collect();
        let want_keys: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
        if got_keys != want_keys {
            return Err(FlowError::new(ErrorKind::DictResultMismatch {
                operation: op.name().to_string(),
                expected: expected.to_vec(),
                got: describe(&OpOutput::Dict(map)),
            }));
        }
        let mut map = map;
        return Ok(expected
            .iter()
            .map(|name| (name.clone(), map.remove(name).unwrap_or(Value::Null)))
            .collect());
    }

    match expected.len() {
        0 => Ok(Vec::new()),
        1 => {
            let value = match out {
                OpOutput::Single(v) => v,
                OpOutput::Tuple(vs) => Value::Array(vs),
                OpOutput::Dict(d) => Value::Object(Map::from_iter(d)),
                OpOutput::NoResult => unreachable!(),
            };
            Ok(vec![(expected[0].clone(), value)])
        }
        n => {
            let values = match out {
                OpOutput::Tuple(vs) if vs.len() == n => vs,
                OpOutput::Single(Value::Array(vs)) if vs.len() == n => vs,
                other => {
                    return Err(FlowError::new(ErrorKind::IterableResultArity {
                        operation: op.name().to_string(),
                        expected: n,
                        got: describe(&other),
                    }));
                }
            };
            Ok(expected.iter().cloned().zip(values).collect())
        }
    }
}
