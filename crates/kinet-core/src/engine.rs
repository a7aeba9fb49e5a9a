#![forbid(unsafe_code)]

//! The engine: registration walk, public read/write/subscribe contract,
//! deep subscription, subtree replacement and module hosting.
//!
//! # Architecture
//!
//! [`Kinet`] is a cheap `Rc` handle. All mutable state lives behind
//! `RefCell`s in the shared interior; the path table borrow is always
//! released before any subscriber, computed function or module hook runs, so
//! user code may call back into the engine freely.
//!
//! # Invariants
//!
//! 1. A write notifies the written path's subscribers exactly once, before
//!    the write returns.
//! 2. Deep subscribers of a replaced container are re-expanded over the new
//!    subtree before the replace notifies.
//! 3. A [`Binding`] to a discarded cell fails with `StaleReference`; it never
//!    silently reads or writes whatever now lives at the same path.
//!
//! # Failure Modes
//!
//! - **Notification cycles**: subscribers writing into each other recurse
//!   synchronously. Beyond `max_update_depth` nested notifications, further
//!   notifications are dropped and logged.
//! - **Shallow subscribers below a replaced container**: their cells are
//!   discarded with the old subtree; they are not carried over.

use std::cell::{Cell as StdCell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::cell::CellKey;
use crate::computed::TreeView;
use crate::dep::{DependencySet, Notification, Subscriber, fan_out};
use crate::error::{KinetError, Result};
use crate::module::Module;
use crate::options::{EngineConfig, KinetOptions, ReattachPolicy};
use crate::table::{PathTable, Shape};
use crate::value::{Node, NodeKind};

type Callable = Rc<dyn Fn(Value) -> Value>;

struct Inner {
    table: RefCell<PathTable>,
    callables: RefCell<AHashMap<String, Callable>>,
    modules: RefCell<Vec<Rc<dyn Module>>>,
    config: EngineConfig,
    ready: StdCell<bool>,
    depth: StdCell<usize>,
    evaluating: RefCell<AHashSet<CellKey>>,
}

/// Handle to a reactive tree.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Kinet {
    inner: Rc<Inner>,
}

/// Non-owning handle, for modules and callbacks stored inside the engine.
#[derive(Clone)]
pub struct WeakKinet {
    inner: Weak<Inner>,
}

impl WeakKinet {
    #[must_use]
    pub fn upgrade(&self) -> Option<Kinet> {
        self.inner.upgrade().map(|inner| Kinet { inner })
    }
}

impl fmt::Debug for WeakKinet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakKinet")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Whether a subscription also covers everything below its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeMode {
    #[default]
    Shallow,
    Deep,
}

impl Kinet {
    /// Build the reactive tree for `data` and load the configured modules.
    ///
    /// Fails with `Construction` if the root is not a list or map, or if a
    /// module fails to load.
    pub fn new(data: impl Into<Node>, options: KinetOptions) -> Result<Self> {
        let (table, pending) = PathTable::build(data.into())?;
        let cells = table.len();
        let kinet = Self {
            inner: Rc::new(Inner {
                table: RefCell::new(table),
                callables: RefCell::new(AHashMap::new()),
                modules: RefCell::new(Vec::new()),
                config: options.config,
                ready: StdCell::new(false),
                depth: StdCell::new(0),
                evaluating: RefCell::new(AHashSet::new()),
            }),
        };
        kinet.wire_computed(&pending);
        debug!(message = "kinet.construct", cells, computed = pending.len());

        for descriptor in &options.modules {
            let module = descriptor
                .build(&kinet)
                .map_err(|source| KinetError::Module {
                    name: descriptor.name().to_owned(),
                    source: Box::new(source),
                })?;
            debug!(message = "kinet.module.loaded", name = module.name());
            kinet.inner.modules.borrow_mut().push(module);
        }
        Ok(kinet)
    }

    /// Build from JSON text.
    pub fn from_json(json: &str, options: KinetOptions) -> Result<Self> {
        let data: Value = serde_json::from_str(json)?;
        Self::new(data, options)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakKinet {
        WeakKinet {
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// The current value at `path`.
    ///
    /// Containers are materialized from their live children; computed cells
    /// are evaluated.
    pub fn get(&self, path: &str) -> Result<Value> {
        let shape = self.inner.table.borrow().shape(path)?;
        self.materialize(shape)
    }

    /// A binding to the cell at `path`.
    ///
    /// For computed cells the binding is a snapshot of the evaluation;
    /// otherwise it reads through to the live cell.
    pub fn get_by_path(&self, path: &str) -> Result<Binding> {
        let (key, computed) = {
            let table = self.inner.table.borrow();
            let key = table.key(path)?;
            let computed = table.cell(key).is_some_and(|c| c.is_computed());
            (key, computed)
        };
        let target = if computed {
            BindingTarget::Snapshot(self.get(path)?)
        } else {
            BindingTarget::Live(key)
        };
        Ok(Binding {
            kinet: self.downgrade(),
            path: path.to_owned(),
            target,
        })
    }

    /// Snapshot of the whole tree.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let shape = self.inner.table.borrow().root_shape();
        self.materialize(shape).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.inner.table.borrow().contains(path)
    }

    pub fn kind(&self, path: &str) -> Result<NodeKind> {
        Ok(self.inner.table.borrow().lookup(path)?.kind())
    }

    /// Every registered path, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.inner.table.borrow().paths()
    }

    /// Number of registered cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.table.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of subscribers registered directly on `path`.
    pub fn subscriber_count(&self, path: &str) -> Result<usize> {
        Ok(self.inner.table.borrow().lookup(path)?.dependencies.len())
    }

    pub(crate) fn table(&self) -> Ref<'_, PathTable> {
        self.inner.table.borrow()
    }

    pub(crate) fn table_mut(&self) -> RefMut<'_, PathTable> {
        self.inner.table.borrow_mut()
    }

    fn materialize(&self, shape: Shape) -> Result<Value> {
        match shape {
            Shape::Leaf(value) => Ok(value),
            Shape::List(paths) => paths
                .iter()
                .map(|p| self.get(p))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Shape::Map(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, path) in entries {
                    map.insert(key, self.get(&path)?);
                }
                Ok(Value::Object(map))
            }
            Shape::Computed(key, computed) => {
                let Some(_guard) = EvalGuard::enter(&self.inner.evaluating, key) else {
                    warn!(message = "kinet.computed.reentrant", key = ?key);
                    return Ok(Value::Null);
                };
                Ok(computed.evaluate(&TreeView::new(self)))
            }
        }
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Replace the value at `path` and notify its subscribers with
    /// `(new, old, set_by)`.
    ///
    /// Writing a container creates a fresh cell at `path` with a fresh
    /// subtree. The old cell's subscribers are carried over according to the
    /// configured [`ReattachPolicy`]; deep subscribers are re-expanded over
    /// the new subtree. Subscribers of the old nested paths are dropped with
    /// their cells.
    pub fn set_by_path(&self, path: &str, value: impl Into<Node>, set_by: Option<&str>) -> Result<()> {
        let node = value.into();
        let old = self.get(path)?;
        let mut pending = Vec::new();
        let structural;
        {
            let mut table = self.inner.table.borrow_mut();
            let key = table.key(path)?;
            structural = node.is_container() || table.cell(key).is_some_and(|c| c.is_container());

            if node.is_container() {
                let saved = table.subscribers(key);
                let discarded = table.discard(path);
                table.register(path.to_owned(), node, DependencySet::default(), &mut pending);
                self.reattach(&mut table, path, saved)?;
                debug!(message = "kinet.replace", path, discarded);
            } else {
                table.rebind(key, node, &mut pending);
            }
        }
        self.wire_computed(&pending);
        if structural {
            self.rewire_computed();
        }

        let new = self.get(path)?;
        debug!(message = "kinet.set", path, set_by = ?set_by);
        self.notify(path, &new, Some(&old), set_by);
        Ok(())
    }

    /// Alias for [`set_by_path`](Self::set_by_path) without provenance.
    pub fn set(&self, path: &str, value: impl Into<Node>) -> Result<()> {
        self.set_by_path(path, value, None)
    }

    fn reattach(&self, table: &mut PathTable, path: &str, saved: Vec<Subscriber>) -> Result<()> {
        for subscriber in saved {
            if subscriber.is_deep() {
                table.depend_deep(path, &subscriber)?;
                table.depend(path, &subscriber)?;
                trace!(message = "kinet.reattach", path, subscriber = subscriber.id().raw(), deep = true);
            } else if self.inner.config.reattach == ReattachPolicy::All {
                table.depend(path, &subscriber)?;
                trace!(message = "kinet.reattach", path, subscriber = subscriber.id().raw(), deep = false);
            } else {
                debug!(message = "kinet.reattach.dropped", path, subscriber = subscriber.id().raw());
            }
        }
        Ok(())
    }

    /// Re-send the current value of `path` to its subscribers.
    pub fn force_update(&self, path: &str) -> Result<()> {
        let value = self.get(path)?;
        self.notify(path, &value, None, None);
        Ok(())
    }

    pub(crate) fn notify(&self, path: &str, value: &Value, old: Option<&Value>, set_by: Option<&str>) {
        let subscribers = {
            let table = self.inner.table.borrow();
            match table.key(path) {
                Ok(key) => table.subscribers(key),
                Err(_) => return,
            }
        };
        if subscribers.is_empty() {
            return;
        }
        let Some(_guard) = DepthGuard::enter(&self.inner.depth, self.inner.config.max_update_depth) else {
            error!(
                message = "kinet.notify.depth_exceeded",
                path,
                limit = self.inner.config.max_update_depth
            );
            return;
        };
        fan_out(
            &subscribers,
            &Notification {
                path,
                value,
                old,
                set_by,
            },
        );
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    /// Subscribe `callback` to changes of `path`.
    pub fn subscribe(
        &self,
        path: &str,
        callback: impl Fn(&Notification<'_>) + 'static,
    ) -> Result<Subscription> {
        self.subscribe_with(path, Subscriber::new(callback), SubscribeMode::Shallow)
    }

    /// Subscribe `callback` to `path` and every path currently below it.
    pub fn subscribe_deep(
        &self,
        path: &str,
        callback: impl Fn(&Notification<'_>) + 'static,
    ) -> Result<Subscription> {
        self.subscribe_with(path, Subscriber::new(callback), SubscribeMode::Deep)
    }

    /// Register an existing subscriber.
    ///
    /// Registering the same subscriber twice on a path is a no-op. In deep
    /// mode the subscriber is stamped deep, which makes it survive
    /// replacement of `path` by a new container.
    pub fn subscribe_with(
        &self,
        path: &str,
        subscriber: Subscriber,
        mode: SubscribeMode,
    ) -> Result<Subscription> {
        {
            let mut table = self.inner.table.borrow_mut();
            table.key(path)?;
            if mode == SubscribeMode::Deep {
                subscriber.mark_deep();
                table.depend_deep(path, &subscriber)?;
            }
            table.depend(path, &subscriber)?;
        }
        trace!(message = "kinet.subscribe", path, subscriber = subscriber.id().raw(), mode = ?mode);
        Ok(Subscription {
            kinet: self.downgrade(),
            path: path.to_owned(),
            subscriber,
            mode,
        })
    }

    // ── Computed values ─────────────────────────────────────────────────

    pub(crate) fn wire_computed(&self, pending: &[CellKey]) {
        if pending.is_empty() {
            return;
        }
        let mut table = self.inner.table.borrow_mut();
        for &key in pending {
            let weak = self.downgrade();
            let forwarder = Subscriber::new(move |_| {
                if let Some(kinet) = weak.upgrade() {
                    kinet.refresh_computed(key);
                }
            });
            let Some(dependencies) = table.install_forwarder(key, forwarder.clone()) else {
                continue;
            };
            let path = table.cell(key).map(|c| c.path().to_owned()).unwrap_or_default();
            let mut wired = 0usize;
            for dependency in &dependencies {
                if table.depend(dependency, &forwarder).is_ok() {
                    wired += 1;
                } else {
                    trace!(message = "kinet.computed.unresolved", path = %path, dependency = %dependency);
                }
            }
            debug!(
                message = "kinet.computed.wired",
                path = %path,
                declared = dependencies.len(),
                wired
            );
        }
    }

    /// Re-install every computed forwarder on whatever cells now exist at
    /// its dependency paths. Idempotent.
    pub(crate) fn rewire_computed(&self) {
        let mut table = self.inner.table.borrow_mut();
        for (forwarder, dependencies) in table.computed_links() {
            for dependency in &dependencies {
                let _ = table.depend(dependency, &forwarder);
            }
        }
    }

    fn refresh_computed(&self, key: CellKey) {
        let path = {
            let table = self.inner.table.borrow();
            match table.cell(key) {
                Some(cell) if cell.is_computed() => cell.path().to_owned(),
                _ => return,
            }
        };
        if let Err(err) = self.force_update(&path) {
            trace!(message = "kinet.computed.refresh_failed", path = %path, error = %err);
        }
    }

    // ── Callables ───────────────────────────────────────────────────────

    /// Register a named command. A later registration under the same name
    /// replaces the earlier one.
    pub fn register_callable(&self, name: impl Into<String>, callable: impl Fn(Value) -> Value + 'static) {
        let name = name.into();
        let replaced = self
            .inner
            .callables
            .borrow_mut()
            .insert(name.clone(), Rc::new(callable))
            .is_some();
        debug!(message = "kinet.callable.registered", name = %name, replaced);
    }

    /// Run a named command.
    pub fn run_callable(&self, name: &str, args: Value) -> Result<Value> {
        let callable = self
            .inner
            .callables
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| KinetError::CallableNotFound { name: name.into() })?;
        Ok(callable(args))
    }

    #[must_use]
    pub fn has_callable(&self, name: &str) -> bool {
        self.inner.callables.borrow().contains_key(name)
    }

    // ── Modules ─────────────────────────────────────────────────────────

    /// Tell every module the engine is live.
    ///
    /// Only the first call has an effect; returns whether this was it.
    pub fn signal_ready(&self) -> bool {
        if self.inner.ready.replace(true) {
            return false;
        }
        let modules = self.inner.modules.borrow().clone();
        debug!(message = "kinet.ready", modules = modules.len());
        for module in &modules {
            module.ready(self);
        }
        true
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.get()
    }

    /// Loaded modules, in load order.
    #[must_use]
    pub fn modules(&self) -> Vec<Rc<dyn Module>> {
        self.inner.modules.borrow().clone()
    }

    /// The first loaded module of type `T`.
    #[must_use]
    pub fn find_module<T: Module>(&self) -> Option<Rc<T>> {
        self.inner
            .modules
            .borrow()
            .iter()
            .find_map(|module| Rc::clone(module).into_any().downcast::<T>().ok())
    }
}

impl fmt::Debug for Kinet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kinet")
            .field("cells", &self.len())
            .field("callables", &self.inner.callables.borrow().len())
            .field("modules", &self.inner.modules.borrow().len())
            .field("ready", &self.inner.ready.get())
            .finish()
    }
}

// ── Guards ──────────────────────────────────────────────────────────────

struct DepthGuard<'a> {
    depth: &'a StdCell<usize>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a StdCell<usize>, limit: usize) -> Option<Self> {
        let current = depth.get();
        if current >= limit {
            return None;
        }
        depth.set(current + 1);
        Some(Self { depth })
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

struct EvalGuard<'a> {
    evaluating: &'a RefCell<AHashSet<CellKey>>,
    key: CellKey,
}

impl<'a> EvalGuard<'a> {
    fn enter(evaluating: &'a RefCell<AHashSet<CellKey>>, key: CellKey) -> Option<Self> {
        if !evaluating.borrow_mut().insert(key) {
            return None;
        }
        Some(Self { evaluating, key })
    }
}

impl Drop for EvalGuard<'_> {
    fn drop(&mut self) {
        self.evaluating.borrow_mut().remove(&self.key);
    }
}

// ── Subscription ────────────────────────────────────────────────────────

/// Handle returned by the subscribe family.
///
/// Dropping the handle leaves the subscription in place; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    kinet: WeakKinet,
    path: String,
    subscriber: Subscriber,
    mode: SubscribeMode,
}

impl Subscription {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> SubscribeMode {
        self.mode
    }

    /// The registered subscriber, for direct invocation.
    #[must_use]
    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    /// Invoke the callback now with the current value of the path.
    pub fn sync(&self) -> Result<()> {
        let kinet = self
            .kinet
            .upgrade()
            .ok_or_else(|| KinetError::stale(&self.path))?;
        let value = kinet.get(&self.path)?;
        self.subscriber.call(&Notification {
            path: &self.path,
            value: &value,
            old: None,
            set_by: None,
        });
        Ok(())
    }

    /// Remove the subscriber from the path and, for deep subscriptions, from
    /// every path currently below it.
    ///
    /// Returns how many dependency sets it was removed from.
    pub fn unsubscribe(self) -> usize {
        let Some(kinet) = self.kinet.upgrade() else {
            return 0;
        };
        let removed = kinet.inner.table.borrow_mut().unsubscribe(
            &self.path,
            self.subscriber.id(),
            self.mode == SubscribeMode::Deep,
        );
        trace!(message = "kinet.unsubscribe", path = %self.path, removed);
        removed
    }
}

// ── Binding ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum BindingTarget {
    Live(CellKey),
    Snapshot(Value),
}

/// The record returned by [`Kinet::get_by_path`].
#[derive(Debug, Clone)]
pub struct Binding {
    kinet: WeakKinet,
    path: String,
    target: BindingTarget,
}

impl Binding {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this is a snapshot of a computed evaluation.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        matches!(self.target, BindingTarget::Snapshot(_))
    }

    /// Whether the bound cell has been discarded.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.live().is_err()
    }

    /// The value: a live read, or the captured evaluation.
    pub fn value(&self) -> Result<Value> {
        match &self.target {
            BindingTarget::Snapshot(value) => Ok(value.clone()),
            BindingTarget::Live(_) => self.live()?.get(&self.path),
        }
    }

    /// Write through the binding.
    pub fn set(&self, value: impl Into<Node>, set_by: Option<&str>) -> Result<()> {
        self.live()?.set_by_path(&self.path, value, set_by)
    }

    /// Re-send the current value to the path's subscribers.
    pub fn force_update(&self) -> Result<()> {
        self.live()?.force_update(&self.path)
    }

    /// The engine, provided the bound cell is still the one at the path.
    fn live(&self) -> Result<Kinet> {
        let kinet = self
            .kinet
            .upgrade()
            .ok_or_else(|| KinetError::stale(&self.path))?;
        if let BindingTarget::Live(key) = self.target {
            let current = kinet.inner.table.borrow().key(&self.path).ok();
            if current != Some(key) {
                return Err(KinetError::stale(&self.path));
            }
        }
        Ok(kinet)
    }
}
