#![forbid(unsafe_code)]

//! The path table: flat map from path string to cell.
//!
//! # Invariants
//!
//! 1. Every key reachable from the root (map keys and list indices at every
//!    depth) has exactly one cell.
//! 2. The table is a bijection between paths and live cells: re-registering a
//!    path discards the previous cell.
//! 3. A container cell's recorded shape names exactly the children present
//!    in the table.
//!
//! The table never runs callbacks; every method completes without handing
//! control to user code, so the engine can hold it mutably borrowed.

use ahash::AHashMap;
use indexmap::IndexMap;
use serde_json::Value;
use slotmap::SlotMap;
use tracing::trace;

use crate::cell::{Cell, CellKey, ComputedSlot, Container, Slot};
use crate::computed::Computed;
use crate::dep::{DependencySet, Subscriber, SubscriberId};
use crate::error::{KinetError, Result};
use crate::path;
use crate::value::Node;

/// What a read has to do to produce a value, captured without borrowing.
#[derive(Debug)]
pub(crate) enum Shape {
    Leaf(Value),
    List(Vec<String>),
    Map(Vec<(String, String)>),
    Computed(CellKey, Computed),
}

#[derive(Debug)]
pub(crate) struct PathTable {
    cells: SlotMap<CellKey, Cell>,
    index: AHashMap<String, CellKey>,
    root: Container,
}

impl PathTable {
    /// Register every node under `root`.
    ///
    /// Returns the table and the keys of computed cells awaiting wiring.
    pub(crate) fn build(root: Node) -> Result<(Self, Vec<CellKey>)> {
        let mut table = Self {
            cells: SlotMap::with_key(),
            index: AHashMap::new(),
            root: Container::Map(Vec::new()),
        };
        let mut pending = Vec::new();
        table.root = match root {
            Node::List(items) => table.register_list(None, items, &mut pending),
            Node::Map(entries) => table.register_map(None, entries, &mut pending),
            other => {
                return Err(KinetError::construction(format!(
                    "root must be a list or map, got {}",
                    other.kind().as_str()
                )));
            }
        };
        Ok((table, pending))
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Create a cell for `node` at `path`, registering its children first.
    pub(crate) fn register(
        &mut self,
        path: String,
        node: Node,
        dependencies: DependencySet,
        pending: &mut Vec<CellKey>,
    ) -> CellKey {
        let slot = self.slot_for(&path, node, pending);
        let computed = matches!(slot, Slot::Computed(_));
        trace!(message = "kinet.register", path = %path, kind = slot.kind().as_str());

        let key = self
            .cells
            .insert(Cell::new(path.clone(), slot, dependencies));
        if let Some(previous) = self.index.insert(path, key) {
            self.cells.remove(previous);
        }
        if computed {
            pending.push(key);
        }
        key
    }

    fn slot_for(&mut self, path: &str, node: Node, pending: &mut Vec<CellKey>) -> Slot {
        match node {
            Node::Scalar(scalar) => Slot::Scalar(scalar),
            Node::List(items) => Slot::Container(self.register_list(Some(path), items, pending)),
            Node::Map(entries) => Slot::Container(self.register_map(Some(path), entries, pending)),
            Node::Computed(computed) => Slot::Computed(ComputedSlot::new(computed)),
        }
    }

    fn register_list(
        &mut self,
        base: Option<&str>,
        items: Vec<Node>,
        pending: &mut Vec<CellKey>,
    ) -> Container {
        let len = items.len();
        for (i, item) in items.into_iter().enumerate() {
            self.register(path::index(base, i), item, DependencySet::default(), pending);
        }
        Container::List(len)
    }

    fn register_map(
        &mut self,
        base: Option<&str>,
        entries: IndexMap<String, Node>,
        pending: &mut Vec<CellKey>,
    ) -> Container {
        let mut keys = Vec::with_capacity(entries.len());
        for (key, node) in entries {
            self.register(path::join(base, &key), node, DependencySet::default(), pending);
            keys.push(key);
        }
        Container::Map(keys)
    }

    /// Replace the slot of an existing cell, keeping its key and dependency
    /// set. Nested cells are discarded and the new children registered.
    pub(crate) fn rebind(&mut self, key: CellKey, node: Node, pending: &mut Vec<CellKey>) {
        let Some(cell_path) = self.cells.get(key).map(|c| c.path().to_owned()) else {
            return;
        };
        self.discard_descendants(&cell_path);
        if let Some(forwarder) = self.cells.get(key).and_then(Cell::forwarder).cloned() {
            self.purge(forwarder.id());
        }
        let slot = self.slot_for(&cell_path, node, pending);
        let computed = matches!(slot, Slot::Computed(_));
        if let Some(cell) = self.cells.get_mut(key) {
            cell.slot = slot;
        }
        if computed {
            pending.push(key);
        }
    }

    /// Set the shape of the list cell at `key`.
    pub(crate) fn resize_list(&mut self, key: CellKey, len: usize) {
        if let Some(cell) = self.cells.get_mut(key) {
            cell.slot = Slot::Container(Container::List(len));
        }
    }

    // ── Removal ─────────────────────────────────────────────────────────

    /// Remove the cell at `path` and everything below it.
    ///
    /// Returns the number of cells removed.
    pub(crate) fn discard(&mut self, path: &str) -> usize {
        let removed = self.discard_descendants(path);
        let Some(key) = self.index.remove(path) else {
            return removed;
        };
        let Some(cell) = self.cells.remove(key) else {
            return removed;
        };
        if let Some(forwarder) = cell.forwarder() {
            self.purge(forwarder.id());
        }
        removed + 1
    }

    /// Remove every cell strictly below `path`.
    pub(crate) fn discard_descendants(&mut self, path: &str) -> usize {
        let children = self
            .index
            .get(path)
            .and_then(|key| self.cells.get(*key))
            .map(Cell::child_paths)
            .unwrap_or_default();
        children.iter().map(|child| self.discard(child)).sum()
    }

    /// Remove a subscriber from every dependency set.
    pub(crate) fn purge(&mut self, id: SubscriberId) -> usize {
        self.cells
            .values_mut()
            .map(|cell| cell.dependencies.remove(id))
            .filter(|removed| *removed)
            .count()
    }

    // ── Lookup ──────────────────────────────────────────────────────────

    pub(crate) fn key(&self, path: &str) -> Result<CellKey> {
        self.index
            .get(path)
            .copied()
            .ok_or_else(|| KinetError::not_found(path))
    }

    pub(crate) fn lookup(&self, path: &str) -> Result<&Cell> {
        let key = self.key(path)?;
        self.cells.get(key).ok_or_else(|| KinetError::not_found(path))
    }

    fn lookup_mut(&mut self, path: &str) -> Result<&mut Cell> {
        let key = self.key(path)?;
        self.cells
            .get_mut(key)
            .ok_or_else(|| KinetError::not_found(path))
    }

    pub(crate) fn cell(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(key)
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// All registered paths, sorted.
    pub(crate) fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.index.keys().cloned().collect();
        paths.sort_unstable();
        paths
    }

    /// Direct children of `path`; `None` addresses the root.
    pub(crate) fn child_paths(&self, path: Option<&str>) -> Result<Vec<String>> {
        match path {
            None => Ok(self.root.child_paths(None)),
            Some(path) => Ok(self.lookup(path)?.child_paths()),
        }
    }

    /// Every path strictly below `path`, depth first.
    pub(crate) fn descendants(&self, path: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = self.lookup(path).map(Cell::child_paths).unwrap_or_default();
        stack.reverse();
        while let Some(next) = stack.pop() {
            if let Ok(cell) = self.lookup(&next) {
                let mut children = cell.child_paths();
                children.reverse();
                stack.extend(children);
            }
            out.push(next);
        }
        out
    }

    /// Capture what reading `path` requires.
    pub(crate) fn shape(&self, path: &str) -> Result<Shape> {
        let key = self.key(path)?;
        let cell = self
            .cells
            .get(key)
            .ok_or_else(|| KinetError::not_found(path))?;
        Ok(match &cell.slot {
            Slot::Scalar(scalar) => Shape::Leaf(scalar.to_value()),
            Slot::Container(Container::List(len)) => {
                Shape::List((0..*len).map(|i| path::index(Some(path), i)).collect())
            }
            Slot::Container(map @ Container::Map(_)) => Shape::Map(map.entries(Some(path))),
            Slot::Computed(slot) => Shape::Computed(key, slot.computed.clone()),
        })
    }

    pub(crate) fn root_shape(&self) -> Shape {
        match &self.root {
            Container::List(len) => Shape::List((0..*len).map(|i| path::index(None, i)).collect()),
            map @ Container::Map(_) => Shape::Map(map.entries(None)),
        }
    }

    /// Rebuild the node stored at `path`, computed values included.
    pub(crate) fn node(&self, path: &str) -> Result<Node> {
        let cell = self.lookup(path)?;
        Ok(match &cell.slot {
            Slot::Scalar(scalar) => Node::Scalar(scalar.clone()),
            Slot::Container(Container::List(len)) => Node::List(
                (0..*len)
                    .map(|i| self.node(&path::index(Some(path), i)))
                    .collect::<Result<_>>()?,
            ),
            Slot::Container(Container::Map(keys)) => Node::Map(
                keys.iter()
                    .map(|k| -> Result<(String, Node)> {
                        Ok((k.clone(), self.node(&path::join(Some(path), k))?))
                    })
                    .collect::<Result<_>>()?,
            ),
            Slot::Computed(slot) => Node::Computed(slot.computed.clone()),
        })
    }

    /// The elements of the list at `path`.
    pub(crate) fn list_items(&self, path: &str) -> Result<Vec<Node>> {
        match self.lookup(path)?.slot {
            Slot::Container(Container::List(_)) => match self.node(path)? {
                Node::List(items) => Ok(items),
                _ => Err(KinetError::NotAList { path: path.into() }),
            },
            _ => Err(KinetError::NotAList { path: path.into() }),
        }
    }

    // ── Subscription ────────────────────────────────────────────────────

    pub(crate) fn subscribers(&self, key: CellKey) -> Vec<Subscriber> {
        self.cells
            .get(key)
            .map(|c| c.dependencies.snapshot())
            .unwrap_or_default()
    }

    /// Register `subscriber` on the cell at `path`.
    pub(crate) fn depend(&mut self, path: &str, subscriber: &Subscriber) -> Result<bool> {
        Ok(self.lookup_mut(path)?.dependencies.depend(subscriber))
    }

    /// Register `subscriber` on every cell below `path`.
    pub(crate) fn depend_deep(&mut self, path: &str, subscriber: &Subscriber) -> Result<()> {
        for child in self.child_paths(Some(path))? {
            if self.lookup(&child)?.is_container() {
                self.depend_deep(&child, subscriber)?;
            }
            self.depend(&child, subscriber)?;
        }
        Ok(())
    }

    /// Remove `id` from `path` and, when `deep`, from everything below it.
    pub(crate) fn unsubscribe(&mut self, path: &str, id: SubscriberId, deep: bool) -> usize {
        let mut targets = vec![path.to_owned()];
        if deep {
            targets.extend(self.descendants(path));
        }
        let mut removed = 0;
        for target in &targets {
            if let Ok(cell) = self.lookup_mut(target) {
                removed += usize::from(cell.dependencies.remove(id));
            }
        }
        removed
    }

    // ── Computed wiring ─────────────────────────────────────────────────

    /// Attach a forwarder to the computed cell at `key`.
    ///
    /// Returns the cell's dependency paths, or `None` if the key no longer
    /// names a computed cell.
    pub(crate) fn install_forwarder(
        &mut self,
        key: CellKey,
        forwarder: Subscriber,
    ) -> Option<Vec<String>> {
        match &mut self.cells.get_mut(key)?.slot {
            Slot::Computed(slot) => {
                slot.forwarder = Some(forwarder);
                Some(slot.dependencies.clone())
            }
            _ => None,
        }
    }

    /// Every wired computed cell's forwarder with its dependency paths.
    pub(crate) fn computed_links(&self) -> Vec<(Subscriber, Vec<String>)> {
        self.cells
            .values()
            .filter_map(|cell| match &cell.slot {
                Slot::Computed(ComputedSlot {
                    forwarder: Some(forwarder),
                    dependencies,
                    ..
                }) => Some((forwarder.clone(), dependencies.clone())),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(data: Value) -> PathTable {
        PathTable::build(Node::from(data)).expect("valid root").0
    }

    #[test]
    fn registers_every_reachable_key() {
        let table = build(json!({"a": 1, "b": {"c": [10, {"d": null}]}}));
        assert_eq!(
            table.paths(),
            ["a", "b", "b.c", "b.c.0", "b.c.1", "b.c.1.d"]
        );
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn scalar_root_is_rejected() {
        let err = PathTable::build(Node::from(json!(3))).unwrap_err();
        assert!(matches!(err, KinetError::Construction { .. }));
    }

    #[test]
    fn list_root_uses_index_paths() {
        let table = build(json!([{"x": 1}, 2]));
        assert_eq!(table.paths(), ["0", "0.x", "1"]);
        assert_eq!(table.child_paths(None).unwrap(), ["0", "1"]);
    }

    #[test]
    fn discard_removes_subtree_and_stales_keys() {
        let mut table = build(json!({"p": {"a": 1, "b": {"c": 2}}, "q": 0}));
        let nested = table.key("p.b.c").unwrap();

        assert_eq!(table.discard("p"), 4);
        assert!(!table.contains("p"));
        assert!(!table.contains("p.b.c"));
        assert!(table.cell(nested).is_none());
        assert!(table.contains("q"));
    }

    #[test]
    fn register_over_existing_path_keeps_bijection() {
        let mut table = build(json!({"a": 1}));
        let old = table.key("a").unwrap();
        let mut pending = Vec::new();
        let new = table.register(
            "a".into(),
            Node::from(json!(2)),
            DependencySet::default(),
            &mut pending,
        );
        assert_ne!(old, new);
        assert!(table.cell(old).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rebind_keeps_key_and_dependencies() {
        let mut table = build(json!({"p": {"a": 1}}));
        let key = table.key("p").unwrap();
        let sub = Subscriber::new(|_| {});
        table.depend("p", &sub).unwrap();

        let mut pending = Vec::new();
        table.rebind(key, Node::from(json!({"z": [1, 2]})), &mut pending);

        assert_eq!(table.key("p").unwrap(), key);
        assert!(!table.contains("p.a"));
        assert!(table.contains("p.z.1"));
        assert_eq!(table.subscribers(key), [sub]);
    }

    #[test]
    fn depend_deep_covers_all_descendants() {
        let mut table = build(json!({"p": {"a": 1, "b": {"c": 2}}}));
        let sub = Subscriber::new(|_| {});
        table.depend_deep("p", &sub).unwrap();

        for path in ["p.a", "p.b", "p.b.c"] {
            let key = table.key(path).unwrap();
            assert_eq!(table.subscribers(key), [sub.clone()], "{path}");
        }
        // The path itself is the caller's job.
        assert!(table.subscribers(table.key("p").unwrap()).is_empty());
    }

    #[test]
    fn descendants_are_depth_first() {
        let table = build(json!({"p": {"a": {"x": 1}, "b": 2}}));
        assert_eq!(table.descendants("p"), ["p.a", "p.a.x", "p.b"]);
    }

    #[test]
    fn node_round_trips_shape() {
        let table = build(json!({"l": [1, {"k": "v"}]}));
        let Node::List(items) = table.node("l").unwrap() else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(table.list_items("l"), Ok(ref v) if v.len() == 2));
        assert!(matches!(
            table.list_items("l.1"),
            Err(KinetError::NotAList { .. })
        ));
    }

    #[test]
    fn missing_path_is_not_found() {
        let table = build(json!({"a": 1}));
        assert!(matches!(table.key("b"), Err(KinetError::NotFound { .. })));
        assert!(matches!(
            table.child_paths(Some("b")),
            Err(KinetError::NotFound { .. })
        ));
    }
}
