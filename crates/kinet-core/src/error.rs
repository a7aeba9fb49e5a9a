#![forbid(unsafe_code)]

//! Error taxonomy for the reactive engine.
//!
//! Construction errors are fatal: [`Kinet::new`](crate::Kinet::new) fails
//! outright. Path errors are local and always surfaced to the caller, since a
//! missing path means the observed tree and the registration walk disagree.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KinetError>;

#[derive(Debug, Error)]
pub enum KinetError {
    #[error("construction failed: {reason}")]
    Construction { reason: String },

    #[error("no value registered at path `{path}`")]
    NotFound { path: String },

    #[error("stale reference to `{path}`: the cell was replaced or removed")]
    StaleReference { path: String },

    #[error("value at `{path}` is not a list")]
    NotAList { path: String },

    #[error("no callable registered under `{name}`")]
    CallableNotFound { name: String },

    #[error("module `{name}` failed to load: {source}")]
    Module {
        name: String,
        #[source]
        source: Box<KinetError>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KinetError {
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    #[must_use]
    pub fn stale(path: impl Into<String>) -> Self {
        Self::StaleReference { path: path.into() }
    }

    #[must_use]
    pub fn construction(reason: impl Into<String>) -> Self {
        Self::Construction {
            reason: reason.into(),
        }
    }

    /// The path this error refers to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::NotFound { path } | Self::StaleReference { path } | Self::NotAList { path } => {
                Some(path)
            }
            _ => None,
        }
    }
}
