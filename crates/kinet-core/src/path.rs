#![forbid(unsafe_code)]

//! Dot-separated path helpers.
//!
//! A path is the chain of keys from the root to a node, joined with `.`.
//! List elements use their decimal index as the key (`items.0`).

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// Join a child key onto an optional base path.
#[must_use]
pub fn join(base: Option<&str>, key: &str) -> String {
    match base {
        Some(base) => {
            let mut path = String::with_capacity(base.len() + 1 + key.len());
            path.push_str(base);
            path.push(SEPARATOR);
            path.push_str(key);
            path
        }
        None => key.to_owned(),
    }
}

/// Path of the `index`-th element of the list at `base`.
#[must_use]
pub fn index(base: Option<&str>, index: usize) -> String {
    join(base, &index.to_string())
}

/// Whether `path` lies strictly below `ancestor`.
#[must_use]
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len() + 1
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(SEPARATOR)
}
