#![forbid(unsafe_code)]

//! Kinet public facade crate.
//!
//! Re-exports the engine from `kinet-core` and, with the `url` feature, the
//! URL synchronization module.

pub use kinet_core::*;

#[cfg(feature = "url")]
pub use kinet_url as url;

pub mod prelude {
    pub use kinet_core::{
        Binding, Computed, Kinet, KinetError, KinetOptions, Module, ModuleDescriptor, Node,
        Notification, ReattachPolicy, SubscribeMode, Subscription, TreeView, computed,
    };
    pub use serde_json::{Value, json};

    #[cfg(feature = "url")]
    pub use kinet_url::{History, MemoryHistory, UrlHooks, UrlModule, UrlModuleOptions};
}
