//! Field location paths.
//!
//! A [`KeyPath`] identifies the location of a field inside a document tree as
//! an ordered sequence of steps. A step is either an object key or an array
//! index; the reserved index [`WILDCARD_INDEX`] matches any array element.
//! Paths serialize as plain JSON arrays mixing strings and numbers, e.g.
//! `["items", -1, "price"]`.

mod access;

pub use access::{for_each_value_mut, get_value, move_value, remove_value, set_value, take_value};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel array index meaning "any array element".
pub const WILDCARD_INDEX: i64 = -1;

/// One step of a [`KeyPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathStep {
    Index(i64),
    Name(String),
}

impl PathStep {
    pub fn name(name: impl Into<String>) -> Self {
        PathStep::Name(name.into())
    }

    pub fn index(index: i64) -> Self {
        PathStep::Index(index)
    }

    pub fn wildcard() -> Self {
        PathStep::Index(WILDCARD_INDEX)
    }

    pub fn is_index(&self) -> bool {
        matches!(self, PathStep::Index(_))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, PathStep::Index(WILDCARD_INDEX))
    }

    pub fn is_empty_name(&self) -> bool {
        matches!(self, PathStep::Name(name) if name.is_empty())
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Name(name) => write!(f, "{}", name),
            PathStep::Index(WILDCARD_INDEX) => write!(f, "*"),
            PathStep::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for PathStep {
    fn from(name: &str) -> Self {
        PathStep::Name(name.to_string())
    }
}

impl From<i64> for PathStep {
    fn from(index: i64) -> Self {
        PathStep::Index(index)
    }
}

/// An ordered, immutable sequence of path steps.
///
/// Two paths are equal iff their step sequences are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPath(Vec<PathStep>);

impl KeyPath {
    pub fn new(steps: Vec<PathStep>) -> Self {
        KeyPath(steps)
    }

    /// Builds an all-name path, the common case in tests and fixtures.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath(names.into_iter().map(|n| PathStep::Name(n.into())).collect())
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PathStep> {
        self.0.last()
    }

    /// Returns a new path extended by one step.
    pub fn join(&self, step: PathStep) -> KeyPath {
        let mut steps = self.0.clone();
        steps.push(step);
        KeyPath(steps)
    }

    pub fn parent(&self) -> Option<KeyPath> {
        if self.0.is_empty() {
            return None;
        }
        Some(KeyPath(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn is_strict_prefix_of(&self, other: &KeyPath) -> bool {
        self.0.len() < other.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Strict prefixes of this path, shortest first.
    pub fn strict_prefixes(&self) -> impl Iterator<Item = KeyPath> + '_ {
        (1..self.0.len()).map(move |len| KeyPath(self.0[..len].to_vec()))
    }

    /// A named path consists solely of non-empty name steps. Only named
    /// fields can be renamed.
    pub fn is_named(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .iter()
                .all(|step| matches!(step, PathStep::Name(name) if !name.is_empty()))
    }

    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(PathStep::is_wildcard)
    }

    /// A concrete path addresses exactly one location (no wildcard steps).
    pub fn is_concrete(&self) -> bool {
        !self.has_wildcard()
    }

    /// Two paths are local to each other when they diverge only in trailing
    /// name steps: after stripping the longest common prefix, neither tail
    /// may contain an index step. Renames must stay local so a field never
    /// moves across array-nesting levels.
    pub fn is_local_to(&self, other: &KeyPath) -> bool {
        let common = self
            .0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count();
        self.0[common..].iter().all(|step| !step.is_index())
            && other.0[common..].iter().all(|step| !step.is_index())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

impl From<Vec<PathStep>> for KeyPath {
    fn from(steps: Vec<PathStep>) -> Self {
        KeyPath(steps)
    }
}

impl FromIterator<PathStep> for KeyPath {
    fn from_iter<I: IntoIterator<Item = PathStep>>(iter: I) -> Self {
        KeyPath(iter.into_iter().collect())
    }
}
