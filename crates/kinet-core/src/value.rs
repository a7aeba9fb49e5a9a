#![forbid(unsafe_code)]

//! Node values held by cells.
//!
//! Input trees arrive either as [`serde_json::Value`] or as hand-built
//! [`Node`]s (the only way to embed a [`Computed`] value). Reads always
//! produce plain [`Value`]s.

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Number, Value};

use crate::computed::Computed;

/// A leaf value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scalar {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl Scalar {
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

/// Discriminant of a [`Node`], reported by [`Kinet::kind`](crate::Kinet::kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Scalar,
    List,
    Map,
    Computed,
}

impl NodeKind {
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::List | Self::Map)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::List => "list",
            Self::Map => "map",
            Self::Computed => "computed",
        }
    }
}

/// A node of the reactive tree.
#[derive(Clone)]
pub enum Node {
    Scalar(Scalar),
    /// Ordered container; children are addressed by index.
    List(Vec<Node>),
    /// Keyed container; children keep insertion order.
    Map(IndexMap<String, Node>),
    Computed(Computed),
}

impl Node {
    #[must_use]
    pub fn null() -> Self {
        Self::Scalar(Scalar::Null)
    }

    /// Build a keyed container from `(key, node)` pairs.
    pub fn map<K, N, I>(entries: I) -> Self
    where
        K: Into<String>,
        N: Into<Node>,
        I: IntoIterator<Item = (K, N)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, n)| (k.into(), n.into()))
                .collect(),
        )
    }

    /// Build an ordered container.
    pub fn list<N, I>(items: I) -> Self
    where
        N: Into<Node>,
        I: IntoIterator<Item = N>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Scalar(_) => NodeKind::Scalar,
            Self::List(_) => NodeKind::List,
            Self::Map(_) => NodeKind::Map,
            Self::Computed(_) => NodeKind::Computed,
        }
    }

    #[must_use]
    pub fn is_container(&self) -> bool {
        self.kind().is_container()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.debug_tuple("Scalar").field(s).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Self::Computed(c) => f.debug_tuple("Computed").field(c).finish(),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Scalar(Scalar::Null),
            Value::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Self::Scalar(Scalar::Number(n)),
            Value::String(s) => Self::Scalar(Scalar::String(s)),
            Value::Array(items) => Self::List(items.into_iter().map(Node::from).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Node::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Scalar> for Node {
    fn from(scalar: Scalar) -> Self {
        Self::Scalar(scalar)
    }
}

impl From<Computed> for Node {
    fn from(computed: Computed) -> Self {
        Self::Computed(computed)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Self::Scalar(Scalar::Bool(b))
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Self::Scalar(Scalar::String(s.to_owned()))
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Self::Scalar(Scalar::String(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_keeps_shape_and_order() {
        let node = Node::from(json!({"b": [1, null], "a": {"c": "x"}}));
        let Node::Map(entries) = node else {
            panic!("expected map");
        };
        let keys: Vec<_> = entries.keys().cloned().collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(entries["b"].kind(), NodeKind::List);
        assert_eq!(entries["a"].kind(), NodeKind::Map);
    }

    #[test]
    fn null_becomes_empty_scalar() {
        let node = Node::from(Value::Null);
        assert!(matches!(node, Node::Scalar(Scalar::Null)));
        assert_eq!(Scalar::Null.to_value(), Value::Null);
    }

    #[test]
    fn builders_accept_mixed_children() {
        let node = Node::map([("name", Node::from("kinet")), ("tags", Node::list(["a", "b"]))]);
        assert_eq!(node.kind(), NodeKind::Map);
        assert!(node.is_container());
        assert!(!NodeKind::Computed.is_container());
    }
}
