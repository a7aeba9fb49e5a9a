#![forbid(unsafe_code)]

//! Session history backends.

use std::cell::{Cell, RefCell};

use serde_json::Value;

/// The slice of a browser-style session history the URL module needs.
pub trait History {
    /// The current location.
    fn href(&self) -> String;

    /// Add an entry carrying `state` and make `url` the current location.
    fn push_state(&self, state: Value, url: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub url: String,
    pub state: Value,
}

/// In-process history with back/forward navigation.
///
/// Pushing while not at the newest entry drops the forward entries.
#[derive(Debug)]
pub struct MemoryHistory {
    entries: RefCell<Vec<HistoryEntry>>,
    cursor: Cell<usize>,
}

impl MemoryHistory {
    #[must_use]
    pub fn new(initial_url: impl Into<String>) -> Self {
        Self {
            entries: RefCell::new(vec![HistoryEntry {
                url: initial_url.into(),
                state: Value::Null,
            }]),
            cursor: Cell::new(0),
        }
    }

    /// Number of entries, including the initial one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.borrow().clone()
    }

    #[must_use]
    pub fn current(&self) -> HistoryEntry {
        self.entries.borrow()[self.cursor.get()].clone()
    }

    /// Step back one entry and return its state, as a pop-state event would.
    pub fn back(&self) -> Option<Value> {
        let at = self.cursor.get().checked_sub(1)?;
        self.cursor.set(at);
        Some(self.entries.borrow()[at].state.clone())
    }

    /// Step forward one entry and return its state.
    pub fn forward(&self) -> Option<Value> {
        let at = self.cursor.get() + 1;
        let state = self.entries.borrow().get(at)?.state.clone();
        self.cursor.set(at);
        Some(state)
    }
}

impl History for MemoryHistory {
    fn href(&self) -> String {
        self.current().url
    }

    fn push_state(&self, state: Value, url: &str) {
        let mut entries = self.entries.borrow_mut();
        entries.truncate(self.cursor.get() + 1);
        entries.push(HistoryEntry {
            url: url.to_owned(),
            state,
        });
        self.cursor.set(entries.len() - 1);
    }
}
