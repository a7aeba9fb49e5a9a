#![forbid(unsafe_code)]

//! URL synchronization for Kinet: mirrors part of the state into the query
//! string of a session history and restores it on startup and navigation.

pub mod error;
pub mod history;
pub mod module;

pub use error::UrlSyncError;
pub use history::{History, HistoryEntry, MemoryHistory};
pub use module::{
    DISABLE_CALLABLE, ENABLE_CALLABLE, QueryPairs, SET_BY, Scope, UrlHooks, UrlModule,
    UrlModuleOptions, parse_query,
};
