#![forbid(unsafe_code)]

//! Pluggable modules: consumers built on top of the public contract.
//!
//! A module is constructed with its options and a handle to the engine once
//! registration has finished. It may subscribe, read, write and register
//! callables, but only through [`Kinet`]'s public methods. After the host
//! calls [`Kinet::signal_ready`], every module's [`Module::ready`] hook runs
//! exactly once.
//!
//! Modules that need the engine later should keep a
//! [`WeakKinet`](crate::WeakKinet), not a [`Kinet`]: the engine owns its
//! modules, so a strong handle would form a cycle.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::engine::Kinet;
use crate::error::Result;

pub trait Module: Any {
    /// Stable name, used in logs and for lookup.
    fn name(&self) -> &str;

    /// The engine is live: construction finished and the host signalled
    /// readiness.
    fn ready(&self, _kinet: &Kinet) {}

    /// Upcast for [`Kinet::find_module`].
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

type ModuleFactory = Rc<dyn Fn(&Value, &Kinet) -> Result<Rc<dyn Module>>>;

/// How to build one module: a name, its options, and a constructor.
#[derive(Clone)]
pub struct ModuleDescriptor {
    name: String,
    options: Value,
    factory: ModuleFactory,
}

impl ModuleDescriptor {
    pub fn new(
        name: impl Into<String>,
        options: Value,
        factory: impl Fn(&Value, &Kinet) -> Result<Rc<dyn Module>> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            factory: Rc::new(factory),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn options(&self) -> &Value {
        &self.options
    }

    pub(crate) fn build(&self, kinet: &Kinet) -> Result<Rc<dyn Module>> {
        (self.factory)(&self.options, kinet)
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
