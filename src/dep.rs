//! Data names and the modifier tags that annotate them.
//!
//! Every value slot in a computation graph is identified by a [`DataName`].
//! Side-effect names are a distinct variant, so `"x"` and `sideffect("x")`
//! can never collide in a solution or an input mapping.
//!
//! A [`Dep`] wraps a name with the needs-side/provides-side annotations the
//! planner interprets:
//! - [`optional`] -- the need does not block satisfiability; bound by keyword.
//! - [`vararg`] / [`varargs`] -- optional positional extras, flattened into
//!   the callable's vararg slot.
//! - [`sideffect`] -- an effect with no stored value; orders operations only.
//! - [`sfxed`] -- a real name that additionally asserts named side-effects.

use serde::Serialize;
use std::fmt;

/// Identifier of a value slot: either real data or a side-effect token.
///
/// Equality and ordering take the variant into account, so a side-effect
/// token never aliases real data of the same spelling.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DataName {
    /// A real value slot, stored in the solution.
    Real(String),
    /// A side-effect token; satisfied by execution, never stored.
    Sfx(String),
}

impl DataName {
    /// Build a side-effect token.
    pub fn sfx(name: impl Into<String>) -> Self {
        DataName::Sfx(name.into())
    }

    /// The underlying spelling, without the side-effect marker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            DataName::Real(s) | DataName::Sfx(s) => s,
        }
    }

    /// True for side-effect tokens.
    #[must_use]
    pub fn is_sideffect(&self) -> bool {
        matches!(self, DataName::Sfx(_))
    }
}

impl From<&str> for DataName {
    fn from(s: &str) -> Self {
        DataName::Real(s.to_string())
    }
}

impl From<String> for DataName {
    fn from(s: String) -> Self {
        DataName::Real(s)
    }
}

impl fmt::Display for DataName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataName::Real(s) => write!(f, "{s}"),
            DataName::Sfx(s) => write!(f, "sideffect('{s}')"),
        }
    }
}

impl fmt::Debug for DataName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataName::Real(s) => write!(f, "'{s}'"),
            DataName::Sfx(s) => write!(f, "sideffect('{s}')"),
        }
    }
}

/// A possibly-modified dependency, as listed in an operation's needs or
/// provides.
///
/// Plain strings convert into required real dependencies; the constructor
/// functions in this module produce the modified forms.
#[derive(Clone, PartialEq, Eq)]
pub struct Dep {
    name: DataName,
    optional: bool,
    vararg: bool,
    varargs: bool,
    keyword: Option<String>,
    sfx: Vec<String>,
}

impl Dep {
    fn plain(name: DataName) -> Self {
        Dep {
            name,
            optional: false,
            vararg: false,
            varargs: false,
            keyword: None,
            sfx: Vec::new(),
        }
    }

    /// The dependency's name.
    #[must_use]
    pub fn name(&self) -> &DataName {
        &self.name
    }

    /// True when this dependency never blocks satisfiability
    /// (optional, vararg or varargs).
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional || self.vararg || self.varargs
    }

    /// True for `optional(..)` proper (keyword-bound).
    #[must_use]
    pub fn is_keyword_optional(&self) -> bool {
        self.optional
    }

    /// True for `vararg(..)`.
    #[must_use]
    pub fn is_vararg(&self) -> bool {
        self.vararg
    }

    /// True for `varargs(..)`.
    #[must_use]
    pub fn is_varargs(&self) -> bool {
        self.varargs
    }

    /// The keyword the value is bound under, for optional needs.
    /// Defaults to the data name itself.
    #[must_use]
    pub fn keyword(&self) -> &str {
        self.keyword.as_deref().unwrap_or_else(|| self.name.as_str())
    }

    /// Side-effect tokens asserted alongside a real name (`sfxed`).
    #[must_use]
    pub fn sideffects(&self) -> &[String] {
        &self.sfx
    }
}

impl From<&str> for Dep {
    fn from(s: &str) -> Self {
        Dep::plain(DataName::from(s))
    }
}

impl From<String> for Dep {
    fn from(s: String) -> Self {
        Dep::plain(DataName::from(s))
    }
}

impl From<DataName> for Dep {
    fn from(name: DataName) -> Self {
        Dep::plain(name)
    }
}

impl From<&Dep> for Dep {
    fn from(d: &Dep) -> Self {
        d.clone()
    }
}

impl fmt::Display for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.name.as_str();
        if self.name.is_sideffect() {
            write!(f, "sideffect('{n}')")
        } else if self.vararg {
            write!(f, "vararg('{n}')")
        } else if self.varargs {
            write!(f, "varargs('{n}')")
        } else if self.optional {
            match &self.keyword {
                Some(kw) => write!(f, "optional('{n}'>'{kw}')"),
                None => write!(f, "optional('{n}')"),
            }
        } else if !self.sfx.is_empty() {
            write!(f, "sfxed('{n}', {:?})", self.sfx)
        } else {
            write!(f, "'{n}'")
        }
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An optional need: skipped when absent from the solution, bound under its
/// own name when present.
pub fn optional(name: impl Into<String>) -> Dep {
    Dep {
        optional: true,
        ..Dep::plain(DataName::Real(name.into()))
    }
}

/// An optional need bound under an alternate keyword.
pub fn optional_kw(name: impl Into<String>, keyword: impl Into<String>) -> Dep {
    Dep {
        optional: true,
        keyword: Some(keyword.into()),
        ..Dep::plain(DataName::Real(name.into()))
    }
}

/// An optional positional need appended to the callable's vararg slot as a
/// single value.
pub fn vararg(name: impl Into<String>) -> Dep {
    Dep {
        vararg: true,
        ..Dep::plain(DataName::Real(name.into()))
    }
}

/// Like [`vararg`], but the value is an array whose elements are flattened
/// into the vararg slot.
pub fn varargs(name: impl Into<String>) -> Dep {
    Dep {
        varargs: true,
        ..Dep::plain(DataName::Real(name.into()))
    }
}

/// A side-effect dependency; orders execution but carries no value.
pub fn sideffect(name: impl Into<String>) -> Dep {
    Dep::plain(DataName::Sfx(name.into()))
}

/// A real dependency that additionally asserts the given side-effects.
pub fn sfxed<I, S>(real: impl Into<String>, sideffects: I) -> Dep
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Dep {
        sfx: sideffects.into_iter().map(Into::into).collect(),
        ..Dep::plain(DataName::Real(real.into()))
    }
}
