#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! [`EngineConfig`] is plain data and can be loaded from JSON; modules are
//! host code and are attached through the [`KinetOptions`] builder.

use serde::{Deserialize, Serialize};

use crate::module::ModuleDescriptor;

/// Which of a replaced container's own subscribers survive the replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReattachPolicy {
    /// Every subscriber of the replaced path is re-registered on the new
    /// cell; deep ones are also re-expanded over the new subtree.
    #[default]
    All,
    /// Only deep subscribers are re-registered. Shallow subscribers of the
    /// replaced path stop receiving notifications.
    DeepOnly,
}

/// Serializable engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reattach: ReattachPolicy,
    /// Maximum nesting of notifications triggered from inside subscribers.
    ///
    /// Past the limit a notification is not delivered to anyone and an
    /// error-level `kinet.notify.depth_exceeded` event is logged. Each link
    /// of a computed chain adds one level, so hosts with chains longer than
    /// the limit must raise it with
    /// [`KinetOptions::with_max_update_depth`]. Values still read correctly
    /// through [`Kinet::get`](crate::Kinet::get); only delivery is cut.
    pub max_update_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reattach: ReattachPolicy::All,
            max_update_depth: 64,
        }
    }
}

/// Options for [`Kinet::new`](crate::Kinet::new).
#[derive(Debug, Clone, Default)]
pub struct KinetOptions {
    pub config: EngineConfig,
    /// Modules constructed, in order, once registration completes.
    pub modules: Vec<ModuleDescriptor>,
}

impl KinetOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_module(mut self, module: ModuleDescriptor) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn with_reattach(mut self, policy: ReattachPolicy) -> Self {
        self.config.reattach = policy;
        self
    }

    #[must_use]
    pub fn with_max_update_depth(mut self, depth: usize) -> Self {
        self.config.max_update_depth = depth;
        self
    }
}
