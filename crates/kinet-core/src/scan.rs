#![forbid(unsafe_code)]

//! Best-effort dependency discovery from a computed function's source text.
//!
//! This is a text scan, not a parser. It finds the sole parameter of a
//! one-argument function and collects the paths read through it:
//!
//! - member chains rooted at the parameter (`state.cart.total`) contribute
//!   their **final** segment only (`total`), which is then looked up as a
//!   top-level path;
//! - accessor calls with a string literal (`state.number("cart.total")`)
//!   contribute the literal path verbatim.
//!
//! Indexed access, aliasing and indirect references are invisible to it, and
//! two chains ending in the same segment are conflated. A source with no
//! recognisable parameter, or no matches, yields no dependencies.

use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::Regex;

/// `|state| ...`, `move |state: &TreeView<'_>| ...`
static RUST_CLOSURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:move\s+)?\|\s*&?\s*(?:mut\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*(?::[^|,]*)?\|")
        .expect("closure pattern is valid")
});

/// `state => ...`, `(state) => ...`
static ARROW_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:async\s+)?\(?\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\)?\s*=>")
        .expect("arrow pattern is valid")
});

/// `function (state) { ... }`, `function total(state) { ... }`
static NAMED_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:async\s+)?function\b[^(]*\(\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\)")
        .expect("function pattern is valid")
});

/// Outcome of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Name of the function's sole parameter, if one was recognised.
    pub parameter: Option<String>,
    /// Discovered paths, deduplicated, in first-seen order.
    pub paths: IndexSet<String>,
}

impl ScanResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Extract the name of the sole formal parameter.
#[must_use]
pub fn parameter_name(source: &str) -> Option<String> {
    [&*RUST_CLOSURE, &*ARROW_FN, &*NAMED_FN]
        .into_iter()
        .find_map(|pattern| pattern.captures(source))
        .map(|caps| caps[1].to_owned())
}

/// Scan `source` for the paths it reads through its parameter.
#[must_use]
pub fn scan(source: &str) -> ScanResult {
    let Some(parameter) = parameter_name(source) else {
        return ScanResult::default();
    };
    let param = regex::escape(&parameter);
    let mut paths = IndexSet::new();

    // Accessor calls are matched first so the method name itself is never
    // mistaken for a property below.
    let accessor = Regex::new(&format!(
        r#"(?:^|[^A-Za-z0-9_$.]){param}\s*\.\s*[A-Za-z_$][A-Za-z0-9_$]*\s*\(\s*"((?:[^"\\]|\\.)*)""#
    ));
    let chain = Regex::new(&format!(
        r"(?:^|[^A-Za-z0-9_$.]){param}((?:\s*\.\s*[A-Za-z_$][A-Za-z0-9_$]*)+)(\s*\()?"
    ));
    let (Ok(accessor), Ok(chain)) = (accessor, chain) else {
        return ScanResult {
            parameter: Some(parameter),
            paths,
        };
    };

    for caps in accessor.captures_iter(source) {
        paths.insert(caps[1].to_owned());
    }
    for caps in chain.captures_iter(source) {
        let segments: Vec<&str> = caps[1]
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        // A trailing call means the last segment is a method, not a property.
        let take = if caps.get(2).is_some() {
            segments.len().checked_sub(2)
        } else {
            segments.len().checked_sub(1)
        };
        if let Some(last) = take.map(|at| segments[at]) {
            paths.insert(last.to_owned());
        }
    }

    tracing::trace!(message = "kinet.scan", parameter = %parameter, found = paths.len());
    ScanResult {
        parameter: Some(parameter),
        paths,
    }
}
