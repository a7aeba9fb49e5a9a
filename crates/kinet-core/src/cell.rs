#![forbid(unsafe_code)]

//! Cells: the reactive unit bound to one path.
//!
//! A cell owns its slot and its [`DependencySet`]. Container slots record only
//! the shape of their children (list length, map key order); the children
//! themselves are separate cells in the path table, so every nested value is
//! individually addressable.
//!
//! Cells live in a generational arena. A [`CellKey`] held after its cell was
//! discarded no longer resolves, which is how stale handles are detected.

use slotmap::new_key_type;

use crate::computed::Computed;
use crate::dep::{DependencySet, Subscriber};
use crate::path;
use crate::value::{NodeKind, Scalar};

new_key_type! {
    /// Generational handle to a cell.
    pub struct CellKey;
}

/// Shape of a container's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Container {
    List(usize),
    Map(Vec<String>),
}

impl Container {
    /// Paths of the children of a container at `base` (`None` for the root).
    pub(crate) fn child_paths(&self, base: Option<&str>) -> Vec<String> {
        match self {
            Self::List(len) => (0..*len).map(|i| path::index(base, i)).collect(),
            Self::Map(keys) => keys.iter().map(|k| path::join(base, k)).collect(),
        }
    }

    /// `(key, path)` pairs, for materializing maps.
    pub(crate) fn entries(&self, base: Option<&str>) -> Vec<(String, String)> {
        match self {
            Self::List(len) => (0..*len)
                .map(|i| (i.to_string(), path::index(base, i)))
                .collect(),
            Self::Map(keys) => keys
                .iter()
                .map(|k| (k.clone(), path::join(base, k)))
                .collect(),
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Self::List(_) => NodeKind::List,
            Self::Map(_) => NodeKind::Map,
        }
    }
}

/// A computed slot with its resolved dependency paths.
#[derive(Debug, Clone)]
pub(crate) struct ComputedSlot {
    pub(crate) computed: Computed,
    /// Resolved once, when the slot is created.
    pub(crate) dependencies: Vec<String>,
    /// Subscriber installed on each dependency path; `None` until wired.
    pub(crate) forwarder: Option<Subscriber>,
}

impl ComputedSlot {
    pub(crate) fn new(computed: Computed) -> Self {
        let dependencies = computed.dependencies();
        Self {
            computed,
            dependencies,
            forwarder: None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Scalar(Scalar),
    Container(Container),
    Computed(ComputedSlot),
}

impl Slot {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            Self::Scalar(_) => NodeKind::Scalar,
            Self::Container(c) => c.kind(),
            Self::Computed(_) => NodeKind::Computed,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Cell {
    path: String,
    pub(crate) slot: Slot,
    pub(crate) dependencies: DependencySet,
}

impl Cell {
    pub(crate) fn new(path: String, slot: Slot, dependencies: DependencySet) -> Self {
        Self {
            path,
            slot,
            dependencies,
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.slot.kind()
    }

    pub(crate) fn is_container(&self) -> bool {
        matches!(self.slot, Slot::Container(_))
    }

    pub(crate) fn is_computed(&self) -> bool {
        matches!(self.slot, Slot::Computed(_))
    }

    /// Paths of the direct children, empty for leaves.
    pub(crate) fn child_paths(&self) -> Vec<String> {
        match &self.slot {
            Slot::Container(c) => c.child_paths(Some(&self.path)),
            Slot::Scalar(_) | Slot::Computed(_) => Vec::new(),
        }
    }

    /// Subscribers stamped deep, in registration order.
    pub(crate) fn deep_subscribers(&self) -> Vec<Subscriber> {
        self.dependencies
            .subscribers()
            .iter()
            .filter(|s| s.is_deep())
            .cloned()
            .collect()
    }

    /// The forwarder of a computed slot, if wired.
    pub(crate) fn forwarder(&self) -> Option<&Subscriber> {
        match &self.slot {
            Slot::Computed(c) => c.forwarder.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn container_child_paths() {
        assert_eq!(
            Container::List(3).child_paths(Some("items")),
            ["items.0", "items.1", "items.2"]
        );
        assert_eq!(
            Container::Map(vec!["a".into(), "b".into()]).child_paths(None),
            ["a", "b"]
        );
        assert_eq!(
            Container::List(2).entries(None),
            [("0".to_string(), "0".to_string()), ("1".into(), "1".into())]
        );
    }

    #[test]
    fn leaf_cells_have_no_children() {
        let cell = Cell::new(
            "n".into(),
            Slot::Scalar(Scalar::Null),
            DependencySet::default(),
        );
        assert!(cell.child_paths().is_empty());
        assert!(!cell.is_container());
        assert_eq!(cell.kind(), NodeKind::Scalar);
    }

    #[test]
    fn deep_subscribers_are_filtered() {
        let shallow = Subscriber::new(|_| {});
        let deep = Subscriber::new(|_| {});
        deep.mark_deep();
        let mut deps = DependencySet::default();
        deps.depend(&shallow);
        deps.depend(&deep);

        let cell = Cell::new(
            "m".into(),
            Slot::Container(Container::Map(vec!["x".into()])),
            deps,
        );
        assert_eq!(cell.deep_subscribers(), [deep]);
        assert_eq!(cell.child_paths(), ["m.x"]);
    }

    #[test]
    fn computed_slot_resolves_dependencies_once() {
        let slot = ComputedSlot::new(Computed::new(["a", "b"], |_| Value::Null));
        assert_eq!(slot.dependencies, ["a", "b"]);
        assert!(slot.forwarder.is_none());
        let cell = Cell::new("c".into(), Slot::Computed(slot), DependencySet::default());
        assert!(cell.is_computed());
        assert!(cell.forwarder().is_none());
    }
}
