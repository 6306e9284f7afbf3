//! Error taxonomy with structured salvage attachments.
//!
//! Every failure surfaced by the crate is a [`FlowError`]: a contractual
//! [`ErrorKind`] plus a [`Salvage`] block carrying whatever could be rescued
//! at the failure site (operation name, partial solution, the plan, the
//! per-operation executed map, the bindings passed to a failing callable).
//! Graphs get arbitrarily deep; the salvage block exists so callers can
//! diagnose without re-running under a debugger.

use crate::dep::DataName;
use crate::planner::Plan;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The contractual failure kinds.
#[derive(Debug)]
pub enum ErrorKind {
    /// A requested output is not a data node of the graph (or, for
    /// side-effect outputs, is provided by no operation).
    UnknownOutput(DataName),
    /// Narrowing requested outputs no remaining operation can produce.
    ImpossibleProvides(Vec<DataName>),
    /// A multi-provide operation returned an iterable of the wrong length.
    IterableResultArity {
        operation: String,
        expected: usize,
        got: String,
    },
    /// A dict-returning operation's keys did not match its provides.
    DictResultMismatch {
        operation: String,
        expected: Vec<String>,
        got: String,
    },
    /// A user callable failed.
    OperationFailed {
        operation: String,
        source: anyhow::Error,
    },
    /// The abort flag was observed before a compute step.
    Aborted,
    /// Malformed needs/provides or graph at construction time.
    Validation(String),
    /// Several parallel compute steps failed in the same frontier.
    MultipleFailures(Vec<FlowError>),
}

/// Values rescued at the failure site.
#[derive(Debug, Default)]
pub struct Salvage {
    /// The operation involved, when one is.
    pub operation: Option<String>,
    /// The partial solution at failure time.
    pub solution: Option<BTreeMap<DataName, Value>>,
    /// The plan being executed (absent for planning-time failures).
    pub plan: Option<Arc<Plan>>,
    /// Which planned operations had executed when the failure occurred.
    pub executed: Option<BTreeMap<String, bool>>,
    /// The bindings actually passed to a failing callable, as JSON.
    pub bindings: Option<Value>,
}

/// A failure with structured salvage. See the module docs.
#[derive(Debug)]
pub struct FlowError {
    kind: ErrorKind,
    salvage: Box<Salvage>,
}

impl FlowError {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        FlowError {
            kind,
            salvage: Box::default(),
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        FlowError::new(ErrorKind::Validation(msg.into()))
    }

    /// The failure kind.
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The salvage attachment.
    #[must_use]
    pub fn salvage(&self) -> &Salvage {
        &self.salvage
    }

    /// True for *aborted* failures.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self.kind, ErrorKind::Aborted)
    }

    pub(crate) fn with_operation(mut self, name: impl Into<String>) -> Self {
        self.salvage.operation = Some(name.into());
        self
    }

    pub(crate) fn with_solution(mut self, solution: BTreeMap<DataName, Value>) -> Self {
        self.salvage.solution = Some(solution);
        self
    }

    pub(crate) fn with_plan(mut self, plan: Arc<Plan>) -> Self {
        self.salvage.plan = Some(plan);
        self
    }

    pub(crate) fn with_executed(mut self, executed: BTreeMap<String, bool>) -> Self {
        self.salvage.executed = Some(executed);
        self
    }

    pub(crate) fn with_bindings(mut self, bindings: Value) -> Self {
        self.salvage.bindings = Some(bindings);
        self
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::UnknownOutput(name) => {
                write!(f, "unknown output node {name:?}")
            }
            ErrorKind::ImpossibleProvides(names) => {
                write!(f, "impossible provides, no operation can produce {names:?}")
            }
            ErrorKind::IterableResultArity {
                operation,
                expected,
                got,
            } => write!(
                f,
                "operation '{operation}' expected x{expected} iterable results, got {got}"
            ),
            ErrorKind::DictResultMismatch {
                operation,
                expected,
                got,
            } => write!(
                f,
                "operation '{operation}' expected dict results with keys {expected:?}, got {got}"
            ),
            ErrorKind::OperationFailed { operation, source } => {
                write!(f, "operation '{operation}' failed: {source}")
            }
            ErrorKind::Aborted => write!(f, "execution aborted"),
            ErrorKind::Validation(msg) => write!(f, "validation: {msg}"),
            ErrorKind::MultipleFailures(errs) => {
                write!(f, "{} operations failed:", errs.len())?;
                for e in errs {
                    write!(f, " [{e}]")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::OperationFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
