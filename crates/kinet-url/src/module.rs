#![forbid(unsafe_code)]

//! The URL synchronization module.
//!
//! # Design
//!
//! The module subscribes to one scope path. On every change it asks the host
//! for the key/value pairs to mirror (`query_match`), writes them into the
//! query string of the current location and pushes a history entry. On
//! startup and on history navigation it hands parsed pairs back to the host
//! (`on_restore`), which applies them to the engine.
//!
//! Writes made by the host while restoring should carry [`SET_BY`] as their
//! provenance tag; the module ignores changes tagged that way, which is what
//! keeps restore and mirror from echoing each other.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use kinet_core::{Kinet, Module, ModuleDescriptor, Subscription, WeakKinet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::UrlSyncError;
use crate::history::History;

/// Module name, and the provenance tag the module recognizes as its own.
pub const SET_BY: &str = "KinetURLModule";

pub const DISABLE_CALLABLE: &str = "KinetURLModule.disableURLUpdate";
pub const ENABLE_CALLABLE: &str = "KinetURLModule.enableURLUpdate";

pub type QueryPairs = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub path: String,
    #[serde(default)]
    pub deep: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlModuleOptions {
    pub scope: Scope,
}

impl UrlModuleOptions {
    #[must_use]
    pub fn new(path: impl Into<String>, deep: bool) -> Self {
        Self {
            scope: Scope {
                path: path.into(),
                deep,
            },
        }
    }
}

type QueryMatch = Rc<dyn Fn(&Kinet) -> QueryPairs>;
type OnRestore = Rc<dyn Fn(&Kinet, &QueryPairs)>;

/// Host side of the module: where history lives and how state maps to and
/// from query pairs.
#[derive(Clone)]
pub struct UrlHooks {
    history: Rc<dyn History>,
    query_match: QueryMatch,
    on_restore: OnRestore,
}

impl UrlHooks {
    pub fn new(
        history: Rc<dyn History>,
        query_match: impl Fn(&Kinet) -> QueryPairs + 'static,
        on_restore: impl Fn(&Kinet, &QueryPairs) + 'static,
    ) -> Self {
        Self {
            history,
            query_match: Rc::new(query_match),
            on_restore: Rc::new(on_restore),
        }
    }
}

impl fmt::Debug for UrlHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlHooks").finish_non_exhaustive()
    }
}

/// State shared between the module and its subscriber and callables.
struct Mirror {
    hooks: UrlHooks,
    active: Cell<bool>,
}

impl Mirror {
    /// Mirror the current state into the location. Returns whether a history
    /// entry was pushed.
    fn handle_state_change(&self, kinet: &Kinet, set_by: Option<&str>) -> Result<bool, UrlSyncError> {
        if set_by == Some(SET_BY) || !self.active.get() {
            trace!(message = "kinet.url.skip", set_by = ?set_by, active = self.active.get());
            return Ok(false);
        }
        let pairs = (self.hooks.query_match)(kinet);
        let current = parse(&self.hooks.history.href())?;
        let url = with_query(&current, &pairs);
        if url == current {
            return Ok(false);
        }

        let state = Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        );
        self.hooks.history.push_state(state, url.as_str());
        debug!(message = "kinet.url.push", url = %url);
        Ok(true)
    }

    fn restore(&self, kinet: &Kinet, pairs: &QueryPairs) {
        debug!(message = "kinet.url.restore", pairs = pairs.len());
        (self.hooks.on_restore)(kinet, pairs);
    }
}

fn parse(href: &str) -> Result<Url, UrlSyncError> {
    Url::parse(href).map_err(|source| UrlSyncError::InvalidUrl {
        href: href.to_owned(),
        source,
    })
}

/// `current` with its query replaced by the form-encoded `pairs`. No pairs
/// strips the query entirely.
fn with_query(current: &Url, pairs: &QueryPairs) -> Url {
    let mut url = current.clone();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url
}

/// Parse the query of `href` into ordered pairs. A repeated key keeps its
/// last value.
pub fn parse_query(href: &str) -> Result<QueryPairs, UrlSyncError> {
    Ok(parse(href)?.query_pairs().into_owned().collect())
}

/// Mirrors a scope of the tree into the location's query string.
pub struct UrlModule {
    kinet: WeakKinet,
    options: UrlModuleOptions,
    mirror: Rc<Mirror>,
    subscription: Subscription,
}

impl UrlModule {
    /// A descriptor for [`KinetOptions::with_module`](kinet_core::KinetOptions::with_module).
    #[must_use]
    pub fn descriptor(options: &UrlModuleOptions, hooks: UrlHooks) -> ModuleDescriptor {
        let options = serde_json::to_value(options).unwrap_or(Value::Null);
        Self::descriptor_from_value(options, hooks)
    }

    /// Like [`descriptor`](Self::descriptor), with options as loaded from JSON.
    #[must_use]
    pub fn descriptor_from_value(options: Value, hooks: UrlHooks) -> ModuleDescriptor {
        ModuleDescriptor::new(SET_BY, options, move |options, kinet| {
            let options: UrlModuleOptions =
                serde_json::from_value(options.clone()).map_err(UrlSyncError::Options)?;
            let module: Rc<dyn Module> = Rc::new(Self::attach(options, hooks.clone(), kinet)?);
            Ok(module)
        })
    }

    fn attach(options: UrlModuleOptions, hooks: UrlHooks, kinet: &Kinet) -> kinet_core::Result<Self> {
        let mirror = Rc::new(Mirror {
            hooks,
            active: Cell::new(true),
        });

        let subscription = {
            let mirror = Rc::clone(&mirror);
            let weak = kinet.downgrade();
            let callback = move |n: &kinet_core::Notification<'_>| {
                let Some(kinet) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = mirror.handle_state_change(&kinet, n.set_by) {
                    warn!(message = "kinet.url.mirror_failed", error = %err);
                }
            };
            if options.scope.deep {
                kinet.subscribe_deep(&options.scope.path, callback)?
            } else {
                kinet.subscribe(&options.scope.path, callback)?
            }
        };

        for (name, active) in [(DISABLE_CALLABLE, false), (ENABLE_CALLABLE, true)] {
            let mirror = Rc::clone(&mirror);
            kinet.register_callable(name, move |_| {
                mirror.active.set(active);
                Value::Null
            });
        }

        debug!(
            message = "kinet.url.attached",
            path = %options.scope.path,
            deep = options.scope.deep
        );
        Ok(Self {
            kinet: kinet.downgrade(),
            options,
            mirror,
            subscription,
        })
    }

    #[must_use]
    pub fn options(&self) -> &UrlModuleOptions {
        &self.options
    }

    #[must_use]
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Whether state changes are currently mirrored.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.mirror.active.get()
    }

    /// Mirror the current state now, as if a change with `set_by` happened.
    pub fn handle_state_change(&self, set_by: Option<&str>) -> Result<bool, UrlSyncError> {
        let kinet = self.kinet.upgrade().ok_or(UrlSyncError::EngineGone)?;
        self.mirror.handle_state_change(&kinet, set_by)
    }

    /// A history navigation landed on an entry carrying `state`.
    pub fn handle_pop_state(&self, state: &Value) -> Result<(), UrlSyncError> {
        let kinet = self.kinet.upgrade().ok_or(UrlSyncError::EngineGone)?;
        let pairs: QueryPairs = match state {
            Value::Object(entries) => entries
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
            _ => QueryPairs::new(),
        };
        self.mirror.restore(&kinet, &pairs);
        Ok(())
    }

    /// Pairs in the current location's query string.
    pub fn current_query(&self) -> Result<QueryPairs, UrlSyncError> {
        parse_query(&self.mirror.hooks.history.href())
    }
}

impl Module for UrlModule {
    fn name(&self) -> &str {
        SET_BY
    }

    fn ready(&self, kinet: &Kinet) {
        match self.current_query() {
            Ok(pairs) if !pairs.is_empty() => self.mirror.restore(kinet, &pairs),
            Ok(_) => {}
            Err(err) => warn!(message = "kinet.url.ready_failed", error = %err),
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl fmt::Debug for UrlModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlModule")
            .field("options", &self.options)
            .field("active", &self.mirror.active.get())
            .finish_non_exhaustive()
    }
}
