#![forbid(unsafe_code)]

//! Core: path table, cells, dependency sets, deep subscription and computed
//! values.
//!
//! A [`Kinet`] is built from nested JSON-like data. Every reachable key gets
//! its own cell, addressed by a dot-joined path (`"user.tags.0"`). Writes
//! notify the written path's subscribers synchronously.
//!
//! ```
//! use kinet_core::{Kinet, KinetOptions};
//! use serde_json::json;
//!
//! let kinet = Kinet::new(json!({"count": 0}), KinetOptions::default())?;
//! let sub = kinet.subscribe("count", |n| println!("count is now {}", n.value))?;
//! kinet.set_by_path("count", json!(5), None)?;
//! assert_eq!(kinet.get("count")?, json!(5));
//! sub.unsubscribe();
//! # Ok::<(), kinet_core::KinetError>(())
//! ```

mod cell;
pub mod computed;
pub mod dep;
mod engine;
pub mod error;
mod list;
pub mod module;
pub mod options;
pub mod path;
pub mod scan;
mod table;
pub mod value;

pub use cell::CellKey;
pub use computed::{Computed, DependencySource, TreeView};
pub use dep::{DependencySet, Notification, Subscriber, SubscriberId};
pub use engine::{Binding, Kinet, SubscribeMode, Subscription, WeakKinet};
pub use error::{KinetError, Result};
pub use module::{Module, ModuleDescriptor};
pub use options::{EngineConfig, KinetOptions, ReattachPolicy};
pub use value::{Node, NodeKind, Scalar};
