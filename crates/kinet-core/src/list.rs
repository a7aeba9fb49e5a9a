#![forbid(unsafe_code)]

//! In-place list mutation.
//!
//! A list operation rewrites the element cells and then notifies the list
//! path once, with no old value. Indices that survive the operation keep
//! their cells and subscribers but are rebound silently to whatever element
//! now sits there; indices past the new end are discarded. Deep subscribers
//! of the list are extended to newly created elements.

use serde_json::Value;
use tracing::debug;

use crate::cell::Cell;
use crate::dep::DependencySet;
use crate::engine::Kinet;
use crate::error::Result;
use crate::path;
use crate::value::Node;

impl Kinet {
    /// Append `items` to the list at `path`. Returns the new length.
    pub fn push<N: Into<Node>>(&self, path: &str, items: impl IntoIterator<Item = N>) -> Result<usize> {
        self.mutate_list(path, "push", |list, _| {
            list.extend(items.into_iter().map(Into::into));
            list.len()
        })
    }

    /// Remove and return the last element, `None` on an empty list.
    pub fn pop(&self, path: &str) -> Result<Option<Value>> {
        self.mutate_list(path, "pop", |list, mut values| {
            list.pop();
            values.pop()
        })
    }

    /// Remove and return the first element, `None` on an empty list.
    pub fn shift(&self, path: &str) -> Result<Option<Value>> {
        self.mutate_list(path, "shift", |list, values| {
            if list.is_empty() {
                return None;
            }
            list.remove(0);
            values.into_iter().next()
        })
    }

    /// Prepend `items`, keeping their order. Returns the new length.
    pub fn unshift<N: Into<Node>>(
        &self,
        path: &str,
        items: impl IntoIterator<Item = N>,
    ) -> Result<usize> {
        self.mutate_list(path, "unshift", |list, _| {
            let mut front: Vec<Node> = items.into_iter().map(Into::into).collect();
            front.append(list);
            *list = front;
            list.len()
        })
    }

    /// Remove `delete_count` elements at `start` and insert `items` there.
    ///
    /// `start` and `delete_count` are clamped to the list. Returns the
    /// removed values.
    pub fn splice<N: Into<Node>>(
        &self,
        path: &str,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = N>,
    ) -> Result<Vec<Value>> {
        self.mutate_list(path, "splice", |list, values| {
            let start = start.min(list.len());
            let end = start.saturating_add(delete_count).min(list.len());
            let _ = list.splice(start..end, items.into_iter().map(Into::into));
            values.into_iter().skip(start).take(end - start).collect()
        })
    }

    /// Apply `edit` to the elements of the list at `path`, reconcile the
    /// element cells and notify the list's subscribers.
    ///
    /// `edit` also receives the current element values, for returning what
    /// it removed.
    fn mutate_list<R>(
        &self,
        path: &str,
        op: &'static str,
        edit: impl FnOnce(&mut Vec<Node>, Vec<Value>) -> R,
    ) -> Result<R> {
        let mut items = self.table().list_items(path)?;
        let values = match self.get(path)? {
            Value::Array(values) => values,
            _ => Vec::new(),
        };
        let old_len = items.len();
        let out = edit(&mut items, values);
        let new_len = items.len();

        self.reconcile_list(path, old_len, items)?;
        debug!(message = "kinet.list", op, path, old_len, new_len);

        let value = self.get(path)?;
        self.notify(path, &value, None, None);
        Ok(out)
    }

    fn reconcile_list(&self, path: &str, old_len: usize, items: Vec<Node>) -> Result<()> {
        let mut pending = Vec::new();
        {
            let mut table = self.table_mut();
            let key = table.key(path)?;
            let inherited = table
                .cell(key)
                .map(Cell::deep_subscribers)
                .unwrap_or_default();
            let new_len = items.len();

            for (i, node) in items.into_iter().enumerate() {
                let child = path::index(Some(path), i);
                if i < old_len {
                    let child_key = table.key(&child)?;
                    table.rebind(child_key, node, &mut pending);
                    let deep = table
                        .cell(child_key)
                        .map(Cell::deep_subscribers)
                        .unwrap_or_default();
                    for subscriber in &deep {
                        table.depend_deep(&child, subscriber)?;
                    }
                } else {
                    let mut dependencies = DependencySet::default();
                    for subscriber in &inherited {
                        dependencies.depend(subscriber);
                    }
                    table.register(child.clone(), node, dependencies, &mut pending);
                    for subscriber in &inherited {
                        table.depend_deep(&child, subscriber)?;
                    }
                }
            }
            for i in new_len..old_len {
                table.discard(&path::index(Some(path), i));
            }
            table.resize_list(key, new_len);
        }
        self.wire_computed(&pending);
        self.rewire_computed();
        Ok(())
    }
}
