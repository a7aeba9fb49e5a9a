#![forbid(unsafe_code)]

//! Function-backed values evaluated against the whole tree.
//!
//! # Design
//!
//! A [`Computed`] stores a function of one argument, a read-only
//! [`TreeView`] of the engine, plus a declaration of the paths it reads.
//! Reading the cell evaluates the function; nothing is cached. When the cell
//! is registered, the engine installs one forwarding subscriber on each
//! declared path which re-sends the fresh evaluation to the computed cell's
//! own subscribers.
//!
//! Dependencies are declared explicitly with [`Computed::new`]. The
//! [`computed!`](crate::computed!) macro instead captures the closure's source
//! text and infers them with the [`scan`](crate::scan) heuristic.
//!
//! # Failure Modes
//!
//! - **Undeclared read**: the value is still correct when read, but changes
//!   to that path do not notify the computed cell's subscribers.
//! - **Self reference**: re-entrant evaluation of the same cell yields `null`
//!   and logs a warning.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::engine::Kinet;
use crate::scan;

type ComputeFn = Rc<dyn Fn(&TreeView<'_>) -> Value>;

/// Where a computed value's dependency list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// Paths listed by the author.
    Declared(Vec<String>),
    /// Source text to scan once, at registration.
    Scanned(String),
}

/// A value derived from the tree on every read.
#[derive(Clone)]
pub struct Computed {
    compute: ComputeFn,
    source: DependencySource,
}

impl Computed {
    /// A computed value reading the given paths.
    pub fn new<I, S>(dependencies: I, compute: impl Fn(&TreeView<'_>) -> Value + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            compute: Rc::new(compute),
            source: DependencySource::Declared(dependencies.into_iter().map(Into::into).collect()),
        }
    }

    /// A computed value whose dependencies are inferred from `source`.
    ///
    /// Best effort: see the [`scan`](crate::scan) module for what is found.
    pub fn scanned(
        source: impl Into<String>,
        compute: impl Fn(&TreeView<'_>) -> Value + 'static,
    ) -> Self {
        Self {
            compute: Rc::new(compute),
            source: DependencySource::Scanned(source.into()),
        }
    }

    /// A computed value that is readable but never notifies.
    pub fn untracked(compute: impl Fn(&TreeView<'_>) -> Value + 'static) -> Self {
        Self::new(std::iter::empty::<String>(), compute)
    }

    #[must_use]
    pub fn source(&self) -> &DependencySource {
        &self.source
    }

    /// Resolve the dependency list, scanning if necessary.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        match &self.source {
            DependencySource::Declared(paths) => paths.clone(),
            DependencySource::Scanned(text) => scan::scan(text).paths.into_iter().collect(),
        }
    }

    pub fn evaluate(&self, view: &TreeView<'_>) -> Value {
        (self.compute)(view)
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Build a [`Computed`] from a closure, inferring dependencies from its text.
///
/// ```
/// use kinet_core::{Kinet, KinetOptions, Node, computed};
/// use serde_json::json;
///
/// let total = computed!(|s| json!(s.number("price") * s.number("qty")));
/// let kinet = Kinet::new(
///     Node::map([
///         ("price", Node::from(json!(2))),
///         ("qty", Node::from(json!(3))),
///         ("total", Node::from(total)),
///     ]),
///     KinetOptions::default(),
/// )
/// .unwrap();
/// assert_eq!(kinet.get("total").unwrap(), json!(6.0));
/// ```
#[macro_export]
macro_rules! computed {
    ($compute:expr) => {
        $crate::Computed::scanned(stringify!($compute), $compute)
    };
}

/// Read-only view of the tree handed to computed functions.
///
/// Reads are lenient: a missing path or a value of the wrong type reads as
/// the type's empty value, since a computed function has no way to report an
/// error.
#[derive(Clone, Copy)]
pub struct TreeView<'a> {
    kinet: &'a Kinet,
}

impl<'a> TreeView<'a> {
    pub(crate) fn new(kinet: &'a Kinet) -> Self {
        Self { kinet }
    }

    /// The value at `path`, or `null`.
    #[must_use]
    pub fn get(&self, path: &str) -> Value {
        self.kinet.get(path).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.kinet.contains(path)
    }

    /// The number at `path`, or `0.0`.
    #[must_use]
    pub fn number(&self, path: &str) -> f64 {
        self.get(path).as_f64().unwrap_or(0.0)
    }

    /// The string at `path`; other scalars are rendered, `null` is empty.
    #[must_use]
    pub fn text(&self, path: &str) -> String {
        match self.get(path) {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Truthiness of the value at `path`.
    #[must_use]
    pub fn flag(&self, path: &str) -> bool {
        match self.get(path) {
            Value::Null => false,
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Number of elements of the list (or entries of the map) at `path`.
    #[must_use]
    pub fn len(&self, path: &str) -> usize {
        match self.get(path) {
            Value::Array(items) => items.len(),
            Value::Object(entries) => entries.len(),
            _ => 0,
        }
    }

    /// Snapshot of the whole tree.
    #[must_use]
    pub fn root(&self) -> Value {
        self.kinet.snapshot()
    }
}

impl fmt::Debug for TreeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeView").finish_non_exhaustive()
    }
}
